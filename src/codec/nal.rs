//! Annex-B stream segmentation into access units.

use std::path::Path;

use crate::bitstream::find_start_code;
use crate::codec::{avc, hevc, vvc, CodeType, DecoderConfig};
use crate::{Error, Result};

/// One access unit: the NAL units of a single coded picture.
#[derive(Debug, Clone)]
pub struct Sample {
    /// NAL unit payloads in stream order, start codes removed.
    pub nal_units: Vec<Vec<u8>>,
    /// True when the picture is a random access point.
    pub is_sync: bool,
}

impl Sample {
    /// Byte size in the length-prefixed form used inside `mdat`, where every
    /// NAL unit is preceded by a 4-byte big-endian length.
    pub fn length_prefixed_size(&self) -> u64 {
        self.nal_units
            .iter()
            .map(|nal| 4 + nal.len() as u64)
            .sum()
    }
}

/// Parse result for one elementary stream.
#[derive(Debug, Clone)]
pub struct ParsedBitstream {
    pub config: DecoderConfig,
    pub samples: Vec<Sample>,
}

/// Read and segment an Annex-B file.
pub fn parse_annexb_file(
    path: &Path,
    code_type: CodeType,
    frame_rate: f64,
) -> Result<ParsedBitstream> {
    let data = std::fs::read(path).map_err(|cause| Error::FileIo(path.to_path_buf(), cause))?;
    parse_annexb(&data, code_type, frame_rate).map_err(|err| err.in_file(path))
}

/// Segment an in-memory Annex-B stream and build its configuration record.
pub fn parse_annexb(data: &[u8], code_type: CodeType, frame_rate: f64) -> Result<ParsedBitstream> {
    let nal_units = split_nal_units(data)?;
    match code_type {
        CodeType::Hvc1 | CodeType::Lhv1 => hevc::ingest(&nal_units, frame_rate),
        CodeType::Avc1 => avc::ingest(&nal_units),
        CodeType::Vvc1 => vvc::ingest(&nal_units),
    }
}

/// Split a byte stream into NAL unit payloads (start codes excluded).
///
/// Each span between two start codes is one NAL unit. A stream without a
/// single start code is malformed.
pub(crate) fn split_nal_units(data: &[u8]) -> Result<Vec<&[u8]>> {
    let (first, first_len) = find_start_code(data, 0);
    if first_len == 0 {
        return Err(Error::parse(0, "no start code found in bitstream"));
    }
    if first != 0 {
        debug!("{first} bytes of leading garbage before the first start code");
    }
    let mut units = Vec::new();
    let mut pos = first + first_len;
    while pos < data.len() {
        let (next, next_len) = find_start_code(data, pos);
        if next > pos {
            units.push(&data[pos..next]);
        }
        if next_len == 0 {
            break;
        }
        pos = next + next_len;
    }
    Ok(units)
}

/// Shared access-unit accumulator used by the per-codec ingest loops.
#[derive(Default)]
pub(crate) struct AccessUnitBuilder {
    samples: Vec<Sample>,
    current: Vec<Vec<u8>>,
    current_sync: bool,
}

impl AccessUnitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current access unit, if any.
    pub fn finish_unit(&mut self) {
        if !self.current.is_empty() {
            self.samples.push(Sample {
                nal_units: std::mem::take(&mut self.current),
                is_sync: self.current_sync,
            });
            self.current_sync = false;
        }
    }

    pub fn push(&mut self, nal_unit: &[u8], starts_new_unit: bool, is_irap: bool) {
        if starts_new_unit {
            self.finish_unit();
        }
        self.current.push(nal_unit.to_vec());
        self.current_sync |= is_irap;
    }

    pub fn into_samples(mut self) -> Vec<Sample> {
        self.finish_unit();
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_both_start_code_lengths() {
        let mut data = vec![0x00, 0x00, 0x00, 0x01, 0xaa, 0xbb];
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0xcc]);
        let units = split_nal_units(&data).unwrap();
        assert_eq!(units, vec![&[0xaa, 0xbb][..], &[0xcc][..]]);
    }

    #[test]
    fn stream_without_start_code_is_rejected() {
        assert!(split_nal_units(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn access_units_group_until_boundary() {
        let mut builder = AccessUnitBuilder::new();
        builder.push(&[1], true, true);
        builder.push(&[2], false, false);
        builder.push(&[3], true, false);
        let samples = builder.into_samples();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].is_sync);
        assert_eq!(samples[0].nal_units.len(), 2);
        assert!(!samples[1].is_sync);
        assert_eq!(samples[0].length_prefixed_size(), (4 + 1) * 2);
    }
}
