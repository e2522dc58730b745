//! Reader-side verification of written files.
//!
//! An independent parser over any `Read` source: it walks the box tree,
//! collects the item-level structure of `meta`, the sample tables of `moov`
//! and the raw `mdat` payloads. Tests use it to check that what the writer
//! claims in `iloc`/`iinf`/`iref` is what actually landed in the file; it is
//! also the byte-addressable inspection surface for callers that want to look
//! at a finished file without a media pipeline.

use std::io::{Read, Take};

use bitreader::BitReader;
use byteorder::ReadBytesExt;
use fallible_collections::std_io::TryRead;

use crate::bitstream::BitStream;
use crate::boxes::iprp::ItemProperty;
use crate::fourcc::FourCC;
use crate::{Error, Result, ToU64};

pub type TryVec<T> = fallible_collections::TryVec<T>;

/// Indicate the current offset (i.e., bytes already read) in a reader
pub trait Offset {
    fn offset(&self) -> u64;
}

/// Wraps a reader to track the current offset
pub struct OffsetReader<'a, T> {
    reader: &'a mut T,
    offset: u64,
}

impl<'a, T> OffsetReader<'a, T> {
    pub fn new(reader: &'a mut T) -> Self {
        Self { reader, offset: 0 }
    }
}

impl<T> Offset for OffsetReader<'_, T> {
    fn offset(&self) -> u64 {
        self.offset
    }
}

impl<T: Read> Read for OffsetReader<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.offset = self
            .offset
            .checked_add(bytes_read.to_u64())
            .expect("total bytes read too large for offset type");
        Ok(bytes_read)
    }
}

/// Basic ISO box framing for the read path.
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub name: FourCC,
    /// Size of the box in bytes.
    pub size: u64,
    /// Offset to the start of the contained data (or header size).
    pub offset: u64,
}

impl BoxHeader {
    const MIN_SIZE: u64 = 8; // 4-byte size + 4-byte type
    const MIN_LARGE_SIZE: u64 = 16; // 4-byte size + 4-byte type + 8-byte size
}

/// One box and its content sub-stream.
pub struct BMFFBox<'a, T> {
    head: BoxHeader,
    content: Take<&'a mut T>,
}

pub struct BoxIter<'a, T> {
    src: &'a mut T,
}

impl<T: Read> BoxIter<'_, T> {
    pub fn new(src: &mut T) -> BoxIter<'_, T> {
        BoxIter { src }
    }

    pub fn next_box(&mut self) -> Result<Option<BMFFBox<'_, T>>> {
        let r = read_box_header(self.src);
        match r {
            Ok(h) => Ok(Some(BMFFBox {
                head: h,
                content: self.src.take(h.size - h.offset),
            })),
            Err(Error::EndOfStream) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: Read> Read for BMFFBox<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<T: Read> TryRead for BMFFBox<'_, T> {
    fn try_read_to_end(&mut self, buf: &mut TryVec<u8>) -> std::io::Result<usize> {
        fallible_collections::std_io::try_read_up_to(self, self.bytes_left(), buf)
    }
}

impl<T: Offset> Offset for BMFFBox<'_, T> {
    fn offset(&self) -> u64 {
        self.content.get_ref().offset()
    }
}

impl<'a, T: Read> BMFFBox<'a, T> {
    fn bytes_left(&self) -> u64 {
        self.content.limit()
    }

    fn get_header(&self) -> &BoxHeader {
        &self.head
    }

    fn box_iter(&mut self) -> BoxIter<'_, BMFFBox<'a, T>> {
        BoxIter::new(self)
    }

    /// Read the remaining content into a `BitStream` for detailed parsing,
    /// re-synthesizing the header so box parsers can re-read it.
    fn to_bitstream(&mut self) -> Result<BitStream> {
        let mut bytes = TryVec::new();
        self.try_read_to_end(&mut bytes)?;
        let mut bs = BitStream::new();
        bs.write_u32(0);
        bs.write_u32(self.head.name.value());
        bs.write_bytes(&bytes);
        let total = bs.size();
        bs.patch_u32(0, total as u32);
        bs.reset();
        Ok(bs)
    }
}

impl<T> Drop for BMFFBox<'_, T> {
    fn drop(&mut self) {
        if self.content.limit() > 0 {
            debug!("Dropping {} bytes in '{}'", self.content.limit(), self.head.name);
        }
    }
}

/// Read and parse a box header.
///
/// Call this first to determine the type of a particular box
/// and its length. Used internally for dispatching to specific
/// parsers for the internal content, or to get the length to
/// skip unknown or uninteresting boxes.
pub fn read_box_header<T: ReadBytesExt>(src: &mut T) -> Result<BoxHeader> {
    let size32 = be_u32(src)?;
    let name = FourCC::from(be_u32(src)?);
    let size = match size32 {
        // valid only for a top-level box and means "to end of file"
        0 => return Err(Error::malformed("unknown-sized box")),
        1 => {
            let size64 = be_u64(src)?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::malformed("malformed wide size"));
            }
            size64
        }
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(Error::malformed("malformed size"));
            }
            u64::from(size32)
        }
    };
    let offset = match size32 {
        1 => BoxHeader::MIN_LARGE_SIZE,
        _ => BoxHeader::MIN_SIZE,
    };
    assert!(offset <= size);
    Ok(BoxHeader { name, size, offset })
}

/// Parse the extra header fields for a full box.
fn read_fullbox_extra<T: ReadBytesExt>(src: &mut T) -> Result<(u8, u32)> {
    let version = src.read_u8()?;
    let flags_a = src.read_u8()?;
    let flags_b = src.read_u8()?;
    let flags_c = src.read_u8()?;
    Ok((
        version,
        u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
    ))
}

// Parse the extra fields for a full box whose flag fields must be zero.
fn read_fullbox_version_no_flags<T: ReadBytesExt>(src: &mut T) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;
    if flags != 0 {
        return Err(Error::malformed("expected flags to be 0"));
    }
    Ok(version)
}

/// Skip over the entire contents of a box.
fn skip_box_content<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    let to_skip = {
        let header = src.get_header();
        debug!("{:?} (skipped)", header);
        header
            .size
            .checked_sub(header.offset)
            .expect("header offset > size")
    };
    assert_eq!(to_skip, src.bytes_left());
    skip(src, to_skip)
}

/// Skip over the remaining data of a box.
fn skip_box_remain<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    let remain = {
        let header = src.get_header();
        let len = src.bytes_left();
        debug!("remain {} (skipped) in {:?}", len, header);
        len
    };
    skip(src, remain)
}

/// File type information.
#[derive(Debug)]
pub struct FileTypeInfo {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: TryVec<FourCC>,
}

/// One `infe` as found in the file.
#[derive(Debug)]
pub struct ItemEntry {
    pub item_id: u32,
    pub item_type: FourCC,
    pub flags: u32,
    pub name: TryVec<u8>,
    pub content_type: Option<TryVec<u8>>,
}

/// One `iloc` entry with its base offset folded into the extents.
#[derive(Debug)]
pub struct ItemLocation {
    pub item_id: u32,
    /// 0 = file offsets, 1 = idat offsets, 2 = item offsets.
    pub construction_method: u8,
    pub extents: TryVec<(u64, u64)>,
}

/// One reference edge.
#[derive(Debug)]
pub struct ItemReference {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_id: u32,
}

/// One property association.
#[derive(Debug)]
pub struct Association {
    pub item_id: u32,
    pub property_index: u16,
    pub essential: bool,
}

/// One entity group from `grpl`.
#[derive(Debug)]
pub struct EntityGroup {
    pub group_type: FourCC,
    pub group_id: u32,
    pub entity_ids: TryVec<u32>,
}

/// Everything collected from one `meta` box.
#[derive(Debug, Default)]
pub struct MetaInfo {
    pub handler_type: Option<FourCC>,
    pub primary_item_id: Option<u32>,
    pub items: TryVec<ItemEntry>,
    pub locations: TryVec<ItemLocation>,
    pub references: TryVec<ItemReference>,
    /// `ipco` children in order (indexes in associations are 1-based).
    pub properties: Vec<ItemProperty>,
    pub associations: TryVec<Association>,
    pub idat: TryVec<u8>,
    pub groups: TryVec<EntityGroup>,
}

impl MetaInfo {
    pub fn item(&self, item_id: u32) -> Option<&ItemEntry> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    pub fn location(&self, item_id: u32) -> Option<&ItemLocation> {
        self.locations.iter().find(|l| l.item_id == item_id)
    }

    pub fn references_of_type(&self, reference_type: &[u8; 4]) -> Vec<&ItemReference> {
        self.references
            .iter()
            .filter(|r| r.reference_type == reference_type)
            .collect()
    }

    /// Properties associated with an item, in association order.
    pub fn properties_of(&self, item_id: u32) -> Vec<(&ItemProperty, bool)> {
        self.associations
            .iter()
            .filter(|a| a.item_id == item_id && a.property_index > 0)
            .filter_map(|a| {
                self.properties
                    .get(usize::from(a.property_index - 1))
                    .map(|p| (p, a.essential))
            })
            .collect()
    }
}

/// An `mdat` with its absolute file position.
#[derive(Debug)]
pub struct MediaData {
    pub offset: u64,
    pub data: TryVec<u8>,
}

impl MediaData {
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        offset >= self.offset && offset + length <= self.offset + self.data.len().to_u64()
    }
}

/// One track's sample tables, flattened.
#[derive(Debug, Default)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler_type: Option<FourCC>,
    pub alternate_group: u16,
    /// 16.16 fixed-point as stored in `tkhd`.
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
    pub sample_entry_type: Option<FourCC>,
    pub sample_sizes: TryVec<u32>,
    pub sample_deltas: TryVec<(u32, u32)>,
    pub chunk_offsets: TryVec<u64>,
    pub sync_samples: TryVec<u32>,
    pub references: TryVec<(FourCC, TryVec<u32>)>,
    pub edit_list: TryVec<(u64, i64)>,
}

/// Parsed `moov` structure.
#[derive(Debug, Default)]
pub struct MovieInfo {
    pub timescale: u32,
    pub next_track_id: u32,
    pub tracks: TryVec<TrackInfo>,
}

/// The parts of a HEIF file this reader understands.
#[derive(Debug)]
pub struct HeifFile {
    pub ftyp: FileTypeInfo,
    pub top_level: TryVec<FourCC>,
    pub meta: Option<MetaInfo>,
    pub moov: Option<MovieInfo>,
    pub mdats: TryVec<MediaData>,
}

impl HeifFile {
    /// Resolve an item's full payload from its extents.
    pub fn item_data(&self, item_id: u32) -> Result<TryVec<u8>> {
        let meta = self.meta.as_ref().ok_or(Error::malformed("no meta box"))?;
        let location = meta
            .location(item_id)
            .ok_or(Error::malformed("item has no iloc entry"))?;
        let mut data = TryVec::new();
        for &(offset, length) in &location.extents {
            match location.construction_method {
                0 => {
                    let mdat = self
                        .mdats
                        .iter()
                        .find(|m| m.contains(offset, length))
                        .ok_or(Error::malformed("iloc extent not inside any mdat"))?;
                    let start = to_usize(offset - mdat.offset)?;
                    data.extend_from_slice(&mdat.data[start..start + to_usize(length)?])?;
                }
                1 => {
                    let start = to_usize(offset)?;
                    let slice = meta
                        .idat
                        .get(start..start + to_usize(length)?)
                        .ok_or(Error::malformed("idat extent out of range"))?;
                    data.extend_from_slice(slice)?;
                }
                _ => return Err(Error::malformed("unsupported construction method")),
            }
        }
        Ok(data)
    }
}

/// Narrow a file offset to an in-memory index.
fn to_usize(value: u64) -> Result<usize> {
    Ok(value.try_into()?)
}

/// Read the structure of a written HEIF/ISOBMFF file.
pub fn read_heif<T: Read>(f: &mut T) -> Result<HeifFile> {
    let mut f = OffsetReader::new(f);
    let mut iter = BoxIter::new(&mut f);

    // 'ftyp' box must occur first; see ISO 14496-12:2015 § 4.3.1
    let ftyp = match iter.next_box()? {
        Some(mut b) if b.head.name == b"ftyp" => read_ftyp(&mut b)?,
        _ => return Err(Error::malformed("'ftyp' box must occur first")),
    };

    let mut meta = None;
    let mut moov = None;
    let mut mdats = TryVec::new();
    let mut top_level = TryVec::new();
    top_level.push(FourCC::new(b"ftyp"))?;

    while let Some(mut b) = iter.next_box()? {
        top_level.push(b.head.name)?;
        match &b.head.name.to_bytes() {
            b"meta" => {
                if meta.is_some() {
                    return Err(Error::malformed(
                        "more than one meta box per ISO 14496-12:2015 § 8.11.1.1",
                    ));
                }
                meta = Some(read_meta(&mut b)?);
            }
            b"moov" => {
                if moov.is_some() {
                    return Err(Error::malformed("more than one moov box"));
                }
                moov = Some(read_moov(&mut b)?);
            }
            b"mdat" => {
                let offset = b.offset();
                let mut data = TryVec::new();
                b.try_read_to_end(&mut data)?;
                mdats.push(MediaData { offset, data })?;
            }
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state!(b.content);
    }

    Ok(HeifFile {
        ftyp,
        top_level,
        meta,
        moov,
        mdats,
    })
}

/// Parse an ftyp box.
fn read_ftyp<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<FileTypeInfo> {
    let major = be_u32(src)?;
    let minor = be_u32(src)?;
    let bytes_left = src.bytes_left();
    if bytes_left % 4 != 0 {
        return Err(Error::malformed("invalid ftyp size"));
    }
    let brand_count = bytes_left / 4;
    let mut brands = TryVec::new();
    for _ in 0..brand_count {
        brands.push(FourCC::from(be_u32(src)?))?;
    }
    Ok(FileTypeInfo {
        major_brand: FourCC::from(major),
        minor_version: minor,
        compatible_brands: brands,
    })
}

fn read_meta<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<MetaInfo> {
    let version = read_fullbox_version_no_flags(src)?;
    if version != 0 {
        return Err(Error::malformed("unsupported meta version"));
    }
    let mut meta = MetaInfo::default();
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match &b.head.name.to_bytes() {
            b"hdlr" => {
                let (_, _) = read_fullbox_extra(&mut b)?;
                be_u32(&mut b)?; // pre_defined
                meta.handler_type = Some(FourCC::from(be_u32(&mut b)?));
                skip_box_remain(&mut b)?;
            }
            b"pitm" => meta.primary_item_id = Some(read_pitm(&mut b)?),
            b"iinf" => read_iinf(&mut b, &mut meta.items)?,
            b"iloc" => meta.locations = read_iloc(&mut b)?,
            b"iref" => read_iref(&mut b, &mut meta.references)?,
            b"iprp" => read_iprp(&mut b, &mut meta)?,
            b"idat" => {
                b.try_read_to_end(&mut meta.idat)?;
            }
            b"grpl" => read_grpl(&mut b, &mut meta.groups)?,
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state!(b.content);
    }
    Ok(meta)
}

/// Parse a Primary Item Box. See ISO 14496-12:2015 § 8.11.4
fn read_pitm<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<u32> {
    let version = read_fullbox_version_no_flags(src)?;
    let item_id = match version {
        0 => be_u16(src)?.into(),
        1 => be_u32(src)?,
        _ => return Err(Error::malformed("unsupported pitm version")),
    };
    Ok(item_id)
}

/// Parse an Item Information Box. See ISO 14496-12:2015 § 8.11.6
fn read_iinf<T: Read>(src: &mut BMFFBox<'_, T>, items: &mut TryVec<ItemEntry>) -> Result<()> {
    let version = read_fullbox_version_no_flags(src)?;
    let _entry_count = match version {
        0 => u32::from(be_u16(src)?),
        1 => be_u32(src)?,
        _ => return Err(Error::malformed("unsupported iinf version")),
    };
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        if b.head.name != b"infe" {
            return Err(Error::malformed("iinf box should contain only infe boxes"));
        }
        items.push(read_infe(&mut b)?)?;
        check_parser_state!(b.content);
    }
    Ok(())
}

/// Parse an Item Info Entry. See ISO 14496-12:2015 § 8.11.6.2
fn read_infe<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<ItemEntry> {
    let (version, flags) = read_fullbox_extra(src)?;
    let item_id = match version {
        2 => be_u16(src)?.into(),
        3 => be_u32(src)?,
        _ => return Err(Error::malformed("unsupported version in 'infe' box")),
    };
    let item_protection_index = be_u16(src)?;
    if item_protection_index != 0 {
        return Err(Error::malformed(
            "protected items (infe.item_protection_index != 0) are not supported",
        ));
    }
    let item_type = FourCC::from(be_u32(src)?);
    debug!("infe item_id {} item_type {}", item_id, item_type);
    let name = read_cstring(src)?;
    let content_type = if item_type == b"mime" && src.bytes_left() > 0 {
        Some(read_cstring(src)?)
    } else {
        None
    };
    skip_box_remain(src)?;
    Ok(ItemEntry {
        item_id,
        item_type,
        flags,
        name,
        content_type,
    })
}

fn read_cstring<T: Read>(src: &mut T) -> Result<TryVec<u8>> {
    let mut buf = TryVec::new();
    loop {
        match src.read_u8()? {
            0 => break,
            c => buf.push(c)?,
        }
    }
    Ok(buf)
}

fn read_iref<T: Read>(src: &mut BMFFBox<'_, T>, entries: &mut TryVec<ItemReference>) -> Result<()> {
    let version = read_fullbox_version_no_flags(src)?;
    if version > 1 {
        return Err(Error::malformed("unsupported iref version"));
    }
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        let from_item_id = if version == 0 {
            u32::from(be_u16(&mut b)?)
        } else {
            be_u32(&mut b)?
        };
        let item_count = be_u16(&mut b)?;
        for _ in 0..item_count {
            let to_item_id = if version == 0 {
                be_u16(&mut b)?.into()
            } else {
                be_u32(&mut b)?
            };
            entries.push(ItemReference {
                reference_type: b.head.name,
                from_item_id,
                to_item_id,
            })?;
        }
    }
    Ok(())
}

fn read_iprp<T: Read>(src: &mut BMFFBox<'_, T>, meta: &mut MetaInfo) -> Result<()> {
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match &b.head.name.to_bytes() {
            b"ipco" => {
                let mut inner = b.box_iter();
                while let Some(mut p) = inner.next_box()? {
                    let tag = p.head.name;
                    let mut bs = p.to_bitstream()?;
                    let (mut sub, _) = bs.read_sub_box_stream()?;
                    meta.properties.push(ItemProperty::parse_box(&mut sub, tag)?);
                }
            }
            b"ipma" => read_ipma(&mut b, &mut meta.associations)?,
            _ => return Err(Error::malformed("unexpected iprp child")),
        }
        check_parser_state!(b.content);
    }
    Ok(())
}

fn read_ipma<T: Read>(src: &mut BMFFBox<'_, T>, out: &mut TryVec<Association>) -> Result<()> {
    let (version, flags) = read_fullbox_extra(src)?;
    let entry_count = be_u32(src)?;
    for _ in 0..entry_count {
        let item_id = if version == 0 {
            be_u16(src)?.into()
        } else {
            be_u32(src)?
        };
        let association_count = src.read_u8()?;
        for _ in 0..association_count {
            let first_byte = src.read_u8()?;
            let essential = first_byte & 0x80 != 0;
            let value = first_byte & 0x7f;
            let property_index = if flags & 1 != 0 {
                (u16::from(value) << 8) | u16::from(src.read_u8()?)
            } else {
                u16::from(value)
            };
            out.push(Association {
                item_id,
                property_index,
                essential,
            })?;
        }
    }
    Ok(())
}

/// Parse an item location box inside a meta box.
/// See ISO 14496-12:2015 § 8.11.3
fn read_iloc<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<TryVec<ItemLocation>> {
    let version = read_fullbox_version_no_flags(src)?;
    if version > 2 {
        return Err(Error::malformed("unsupported version in 'iloc' box"));
    }
    let mut buf = TryVec::new();
    src.try_read_to_end(&mut buf)?;
    let mut iloc = BitReader::new(&buf);

    let offset_size = iloc.read_u8(4)?;
    let length_size = iloc.read_u8(4)?;
    let base_offset_size = iloc.read_u8(4)?;
    let index_size = if version > 0 {
        iloc.read_u8(4)?
    } else {
        let _reserved = iloc.read_u8(4)?;
        0
    };
    for width in [offset_size, length_size, base_offset_size, index_size] {
        if width != 0 && width != 4 && width != 8 {
            return Err(Error::malformed("iloc field width must be 0, 4 or 8"));
        }
    }

    let item_count = if version == 2 {
        iloc.read_u32(32)?
    } else {
        iloc.read_u32(16)?
    };
    let mut items = TryVec::new();
    for _ in 0..item_count {
        let item_id = if version == 2 {
            iloc.read_u32(32)?
        } else {
            iloc.read_u32(16)?
        };
        let construction_method = if version > 0 {
            let _reserved = iloc.read_u16(12)?;
            iloc.read_u16(4)? as u8
        } else {
            0
        };
        let data_reference_index = iloc.read_u16(16)?;
        if data_reference_index != 0 {
            return Err(Error::malformed(
                "external data references (iloc.data_reference_index != 0) are not supported",
            ));
        }
        let base_offset = iloc.read_u64(base_offset_size * 8)?;
        let extent_count = iloc.read_u16(16)?;
        if extent_count < 1 {
            return Err(Error::malformed(
                "extent_count must be 1 or greater per ISO 14496-12:2015 § 8.11.3.3",
            ));
        }
        let mut extents = TryVec::new();
        for _ in 0..extent_count {
            if index_size > 0 {
                let _extent_index = iloc.read_u64(index_size * 8)?;
            }
            let extent_offset = iloc.read_u64(offset_size * 8)?;
            let extent_length = iloc.read_u64(length_size * 8)?;
            let start = base_offset
                .checked_add(extent_offset)
                .ok_or(Error::malformed("offset calculation overflow"))?;
            extents.push((start, extent_length))?;
        }
        items.push(ItemLocation {
            item_id,
            construction_method,
            extents,
        })?;
    }
    if iloc.remaining() == 0 {
        Ok(items)
    } else {
        Err(Error::malformed("invalid iloc size"))
    }
}

fn read_grpl<T: Read>(src: &mut BMFFBox<'_, T>, out: &mut TryVec<EntityGroup>) -> Result<()> {
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        let group_type = b.head.name;
        let (_, _) = read_fullbox_extra(&mut b)?;
        let group_id = be_u32(&mut b)?;
        let num_entities = be_u32(&mut b)?;
        let mut entity_ids = TryVec::new();
        for _ in 0..num_entities {
            entity_ids.push(be_u32(&mut b)?)?;
        }
        out.push(EntityGroup {
            group_type,
            group_id,
            entity_ids,
        })?;
        check_parser_state!(b.content);
    }
    Ok(())
}

fn read_moov<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<MovieInfo> {
    let mut movie = MovieInfo::default();
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match &b.head.name.to_bytes() {
            b"mvhd" => {
                let version = read_fullbox_version_no_flags(&mut b)?;
                if version == 1 {
                    be_u64(&mut b)?; // creation_time
                    be_u64(&mut b)?; // modification_time
                    movie.timescale = be_u32(&mut b)?;
                    be_u64(&mut b)?; // duration
                } else {
                    be_u32(&mut b)?;
                    be_u32(&mut b)?;
                    movie.timescale = be_u32(&mut b)?;
                    be_u32(&mut b)?;
                }
                skip(&mut b, 4 + 2 + 2 + 8 + 36 + 24)?; // rate..pre_defined
                movie.next_track_id = be_u32(&mut b)?;
                skip_box_remain(&mut b)?;
            }
            b"trak" => {
                movie.tracks.push(read_trak(&mut b)?)?;
            }
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state!(b.content);
    }
    Ok(movie)
}

fn read_trak<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<TrackInfo> {
    let mut track = TrackInfo::default();
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match &b.head.name.to_bytes() {
            b"tkhd" => {
                let (version, _flags) = read_fullbox_extra(&mut b)?;
                if version == 1 {
                    be_u64(&mut b)?;
                    be_u64(&mut b)?;
                    track.track_id = be_u32(&mut b)?;
                    be_u32(&mut b)?; // reserved
                    be_u64(&mut b)?; // duration
                } else {
                    be_u32(&mut b)?;
                    be_u32(&mut b)?;
                    track.track_id = be_u32(&mut b)?;
                    be_u32(&mut b)?;
                    be_u32(&mut b)?;
                }
                skip(&mut b, 8)?; // reserved
                be_u16(&mut b)?; // layer
                track.alternate_group = be_u16(&mut b)?;
                be_u16(&mut b)?; // volume
                be_u16(&mut b)?; // reserved
                skip(&mut b, 36)?; // matrix
                track.width = be_u32(&mut b)?;
                track.height = be_u32(&mut b)?;
            }
            b"tref" => {
                let mut inner = b.box_iter();
                while let Some(mut r) = inner.next_box()? {
                    let mut ids = TryVec::new();
                    while r.bytes_left() >= 4 {
                        ids.push(be_u32(&mut r)?)?;
                    }
                    track.references.push((r.head.name, ids))?;
                }
            }
            b"edts" => {
                let mut inner = b.box_iter();
                while let Some(mut e) = inner.next_box()? {
                    if e.head.name == b"elst" {
                        let (version, _) = read_fullbox_extra(&mut e)?;
                        let entry_count = be_u32(&mut e)?;
                        for _ in 0..entry_count {
                            let (duration, media_time) = if version == 1 {
                                (be_u64(&mut e)?, be_u64(&mut e)? as i64)
                            } else {
                                (u64::from(be_u32(&mut e)?), i64::from(be_u32(&mut e)? as i32))
                            };
                            be_u16(&mut e)?; // media_rate_integer
                            be_u16(&mut e)?; // media_rate_fraction
                            track.edit_list.push((duration, media_time))?;
                        }
                    } else {
                        skip_box_content(&mut e)?;
                    }
                }
            }
            b"mdia" => read_mdia(&mut b, &mut track)?,
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state!(b.content);
    }
    Ok(track)
}

fn read_mdia<T: Read>(src: &mut BMFFBox<'_, T>, track: &mut TrackInfo) -> Result<()> {
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match &b.head.name.to_bytes() {
            b"mdhd" => {
                let version = read_fullbox_version_no_flags(&mut b)?;
                if version == 1 {
                    be_u64(&mut b)?;
                    be_u64(&mut b)?;
                    track.timescale = be_u32(&mut b)?;
                    be_u64(&mut b)?;
                } else {
                    be_u32(&mut b)?;
                    be_u32(&mut b)?;
                    track.timescale = be_u32(&mut b)?;
                    be_u32(&mut b)?;
                }
                skip_box_remain(&mut b)?;
            }
            b"hdlr" => {
                let (_, _) = read_fullbox_extra(&mut b)?;
                be_u32(&mut b)?; // pre_defined
                track.handler_type = Some(FourCC::from(be_u32(&mut b)?));
                skip_box_remain(&mut b)?;
            }
            b"minf" => {
                let mut inner = b.box_iter();
                while let Some(mut m) = inner.next_box()? {
                    if m.head.name == b"stbl" {
                        read_stbl(&mut m, track)?;
                    } else {
                        skip_box_content(&mut m)?;
                    }
                    check_parser_state!(m.content);
                }
            }
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state!(b.content);
    }
    Ok(())
}

fn read_stbl<T: Read>(src: &mut BMFFBox<'_, T>, track: &mut TrackInfo) -> Result<()> {
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match &b.head.name.to_bytes() {
            b"stsd" => {
                read_fullbox_version_no_flags(&mut b)?;
                let entry_count = be_u32(&mut b)?;
                if entry_count > 0 {
                    let header = read_box_header(&mut b)?;
                    track.sample_entry_type = Some(header.name);
                }
                skip_box_remain(&mut b)?;
            }
            b"stsz" => {
                read_fullbox_version_no_flags(&mut b)?;
                let sample_size = be_u32(&mut b)?;
                let sample_count = be_u32(&mut b)?;
                if sample_size == 0 {
                    for _ in 0..sample_count {
                        track.sample_sizes.push(be_u32(&mut b)?)?;
                    }
                } else {
                    for _ in 0..sample_count {
                        track.sample_sizes.push(sample_size)?;
                    }
                }
            }
            b"stts" => {
                read_fullbox_version_no_flags(&mut b)?;
                let entry_count = be_u32(&mut b)?;
                for _ in 0..entry_count {
                    let count = be_u32(&mut b)?;
                    let delta = be_u32(&mut b)?;
                    track.sample_deltas.push((count, delta))?;
                }
            }
            b"stco" => {
                read_fullbox_version_no_flags(&mut b)?;
                let entry_count = be_u32(&mut b)?;
                for _ in 0..entry_count {
                    track.chunk_offsets.push(u64::from(be_u32(&mut b)?))?;
                }
            }
            b"co64" => {
                read_fullbox_version_no_flags(&mut b)?;
                let entry_count = be_u32(&mut b)?;
                for _ in 0..entry_count {
                    track.chunk_offsets.push(be_u64(&mut b)?)?;
                }
            }
            b"stss" => {
                read_fullbox_version_no_flags(&mut b)?;
                let entry_count = be_u32(&mut b)?;
                for _ in 0..entry_count {
                    track.sync_samples.push(be_u32(&mut b)?)?;
                }
            }
            _ => skip_box_content(&mut b)?,
        }
        check_parser_state!(b.content);
    }
    Ok(())
}

/// Skip a number of bytes that we don't care to parse.
fn skip<T: Read>(src: &mut T, bytes: u64) -> Result<()> {
    std::io::copy(&mut src.take(bytes), &mut std::io::sink())?;
    Ok(())
}

fn be_u16<T: ReadBytesExt>(src: &mut T) -> Result<u16> {
    src.read_u16::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u64<T: ReadBytesExt>(src: &mut T) -> Result<u64> {
    src.read_u64::<byteorder::BigEndian>().map_err(From::from)
}
