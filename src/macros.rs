/// Verify that a box parser consumed its whole content.
///
/// Leftover bytes mean the parser lost sync with the box framing; bail out
/// rather than continuing with a misaligned stream.
macro_rules! check_parser_state {
    ( $src:expr ) => {
        if $src.limit() > 0 {
            debug!("bad parser state: {} content bytes left", $src.limit());
            return Err(Error::malformed("unread box content or bad parser sync"));
        }
    };
}
