//! Movie box and the track-side sample tables.
//! See ISO 14496-12:2015 § 8.2 – § 8.7

use crate::bitstream::BitStream;
use crate::boxes::fragments::MovieExtendsBox;
use crate::boxes::meta::HandlerBox;
use crate::boxes::sampleentry::{AudioSampleEntry, VisualSampleEntry};
use crate::boxes::{BoxHeader, FullBoxHeader, RawBox};
use crate::fourcc::FourCC;
use crate::{Error, Result};

/// The unity matrix used by `mvhd` and `tkhd`.
const UNITY_MATRIX: [u32; 9] = [
    0x0001_0000,
    0,
    0,
    0,
    0x0001_0000,
    0,
    0,
    0,
    0x4000_0000,
];

fn write_matrix(w: &mut BitStream) {
    for value in UNITY_MATRIX {
        w.write_u32(value);
    }
}

/// Movie header `mvhd`. See ISO 14496-12:2015 § 8.2.2
#[derive(Debug, Clone)]
pub struct MovieHeaderBox {
    pub creation_time: u32,
    pub modification_time: u32,
    pub timescale: u32,
    pub duration: u32,
    pub next_track_id: u32,
}

impl Default for MovieHeaderBox {
    fn default() -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            next_track_id: 1,
        }
    }
}

impl MovieHeaderBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"mvhd", 0, 0).start_box(w);
        w.write_u32(self.creation_time);
        w.write_u32(self.modification_time);
        w.write_u32(self.timescale);
        w.write_u32(self.duration);
        w.write_u32(0x0001_0000); // rate = 1.0
        w.write_u16(0x0100); // volume = 1.0
        w.write_u16(0); // reserved
        w.write_u32(0); // reserved
        w.write_u32(0); // reserved
        write_matrix(w);
        for _ in 0..6 {
            w.write_u32(0); // pre_defined
        }
        w.write_u32(self.next_track_id);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"mvhd", 0, 0);
        full_box.parse(r)?;
        if full_box.version() != 0 {
            return Err(Error::parse(r.position(), "unsupported mvhd version"));
        }
        let creation_time = r.read_u32()?;
        let modification_time = r.read_u32()?;
        let timescale = r.read_u32()?;
        let duration = r.read_u32()?;
        r.read_u32()?; // rate
        r.read_u16()?; // volume
        r.read_u16()?;
        r.read_u32()?;
        r.read_u32()?;
        for _ in 0..9 {
            r.read_u32()?; // matrix
        }
        for _ in 0..6 {
            r.read_u32()?; // pre_defined
        }
        let next_track_id = r.read_u32()?;
        Ok(Self {
            creation_time,
            modification_time,
            timescale,
            duration,
            next_track_id,
        })
    }
}

/// Track header `tkhd`. See ISO 14496-12:2015 § 8.3.2
#[derive(Debug, Clone)]
pub struct TrackHeaderBox {
    flags: u32,
    pub track_id: u32,
    pub duration: u32,
    pub alternate_group: u16,
    /// Pixel dimensions; stored as 16.16 fixed point.
    pub width: u32,
    pub height: u32,
}

impl TrackHeaderBox {
    /// track_enabled | track_in_movie | track_in_preview
    pub const FLAGS_ENABLED_IN_MOVIE_AND_PREVIEW: u32 = 0x7;

    pub fn new(track_id: u32) -> Self {
        Self {
            flags: Self::FLAGS_ENABLED_IN_MOVIE_AND_PREVIEW,
            track_id,
            duration: 0,
            alternate_group: 0,
            width: 0,
            height: 0,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"tkhd", 0, self.flags).start_box(w);
        w.write_u32(0); // creation_time
        w.write_u32(0); // modification_time
        w.write_u32(self.track_id);
        w.write_u32(0); // reserved
        w.write_u32(self.duration);
        w.write_u32(0); // reserved
        w.write_u32(0); // reserved
        w.write_u16(0); // layer
        w.write_u16(self.alternate_group);
        w.write_u16(0); // volume
        w.write_u16(0); // reserved
        write_matrix(w);
        w.write_u32(self.width << 16);
        w.write_u32(self.height << 16);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"tkhd", 0, 0);
        full_box.parse(r)?;
        if full_box.version() != 0 {
            return Err(Error::parse(r.position(), "unsupported tkhd version"));
        }
        r.read_u32()?;
        r.read_u32()?;
        let track_id = r.read_u32()?;
        r.read_u32()?;
        let duration = r.read_u32()?;
        r.read_u32()?;
        r.read_u32()?;
        r.read_u16()?; // layer
        let alternate_group = r.read_u16()?;
        r.read_u16()?; // volume
        r.read_u16()?;
        for _ in 0..9 {
            r.read_u32()?;
        }
        let width = r.read_u32()? >> 16;
        let height = r.read_u32()? >> 16;
        Ok(Self {
            flags: full_box.flags(),
            track_id,
            duration,
            alternate_group,
            width,
            height,
        })
    }
}

/// One `tref` child: a typed list of referenced track IDs.
#[derive(Debug, Clone)]
pub struct TrackReferenceTypeBox {
    pub reference_type: FourCC,
    pub track_ids: Vec<u32>,
}

/// Track reference container `tref`. See ISO 14496-12:2015 § 8.3.3
#[derive(Debug, Clone, Default)]
pub struct TrackReferenceBox {
    pub references: Vec<TrackReferenceTypeBox>,
}

impl TrackReferenceBox {
    pub fn add_reference(&mut self, reference_type: FourCC, track_ids: &[u32]) {
        self.references.push(TrackReferenceTypeBox {
            reference_type,
            track_ids: track_ids.to_vec(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"tref").start_box(w);
        for reference in &self.references {
            let inner = BoxHeader::new(&reference.reference_type.to_bytes()).start_box(w);
            for &id in &reference.track_ids {
                w.write_u32(id);
            }
            inner.update_size(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"tref");
        header.parse(r)?;
        let mut tref = Self::default();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            let mut inner = BoxHeader::new(b"    ");
            inner.parse(&mut sub)?;
            let mut track_ids = Vec::new();
            while sub.num_bytes_left() >= 4 {
                track_ids.push(sub.read_u32()?);
            }
            tref.references.push(TrackReferenceTypeBox {
                reference_type: tag,
                track_ids,
            });
        }
        Ok(tref)
    }
}

/// One edit. Durations are in movie timescale, media times in media
/// timescale; -1 media time is an empty edit.
#[derive(Debug, Clone, Copy)]
pub struct EditUnit {
    pub segment_duration: u32,
    pub media_time: i32,
    pub media_rate_integer: i16,
}

/// `edts` holding a single `elst`. See ISO 14496-12:2015 § 8.6.5
#[derive(Debug, Clone, Default)]
pub struct EditBox {
    pub entries: Vec<EditUnit>,
}

impl EditBox {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"edts").start_box(w);
        let elst = FullBoxHeader::new(b"elst", 0, 0).start_box(w);
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            w.write_u32(entry.segment_duration);
            w.write_u32(entry.media_time as u32);
            w.write_u16(entry.media_rate_integer as u16);
            w.write_u16(0); // media_rate_fraction
        }
        elst.update_size(w)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"edts");
        header.parse(r)?;
        let (mut sub, tag) = r.read_sub_box_stream()?;
        if tag != b"elst" {
            return Err(Error::malformed("edts without elst"));
        }
        let mut full_box = FullBoxHeader::new(b"elst", 0, 0);
        full_box.parse(&mut sub)?;
        let entry_count = sub.read_u32()?;
        let mut edit = Self::default();
        for _ in 0..entry_count {
            let segment_duration = sub.read_u32()?;
            let media_time = sub.read_u32()? as i32;
            let media_rate_integer = sub.read_u16()? as i16;
            sub.read_u16()?; // media_rate_fraction
            edit.entries.push(EditUnit {
                segment_duration,
                media_time,
                media_rate_integer,
            });
        }
        Ok(edit)
    }
}

/// Media header `mdhd`. See ISO 14496-12:2015 § 8.4.2
#[derive(Debug, Clone)]
pub struct MediaHeaderBox {
    pub timescale: u32,
    pub duration: u32,
}

impl MediaHeaderBox {
    /// Packed ISO-639-2 code for "und".
    const LANGUAGE_UNDETERMINED: u16 = 0x55c4;

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"mdhd", 0, 0).start_box(w);
        w.write_u32(0); // creation_time
        w.write_u32(0); // modification_time
        w.write_u32(self.timescale);
        w.write_u32(self.duration);
        w.write_u16(Self::LANGUAGE_UNDETERMINED);
        w.write_u16(0); // pre_defined
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"mdhd", 0, 0);
        full_box.parse(r)?;
        if full_box.version() != 0 {
            return Err(Error::parse(r.position(), "unsupported mdhd version"));
        }
        r.read_u32()?;
        r.read_u32()?;
        let timescale = r.read_u32()?;
        let duration = r.read_u32()?;
        r.read_u16()?; // language
        r.read_u16()?; // pre_defined
        Ok(Self {
            timescale,
            duration,
        })
    }
}

/// The `minf` media-specific header alternatives.
#[derive(Debug, Clone)]
pub enum MediaTypeHeader {
    /// `vmhd` for video. See ISO 14496-12:2015 § 12.1.2
    Video,
    /// `smhd` for audio. See ISO 14496-12:2015 § 12.2.2
    Sound,
    /// `nmhd` for everything else.
    Null,
}

impl MediaTypeHeader {
    fn write_box(&self, w: &mut BitStream) -> Result<()> {
        match self {
            Self::Video => {
                let marker = FullBoxHeader::new(b"vmhd", 0, 1).start_box(w);
                w.write_u16(0); // graphicsmode: copy
                for _ in 0..3 {
                    w.write_u16(0); // opcolor
                }
                marker.update_size(w)
            }
            Self::Sound => {
                let marker = FullBoxHeader::new(b"smhd", 0, 0).start_box(w);
                w.write_u16(0); // balance
                w.write_u16(0); // reserved
                marker.update_size(w)
            }
            Self::Null => {
                let marker = FullBoxHeader::new(b"nmhd", 0, 0).start_box(w);
                marker.update_size(w)
            }
        }
    }
}

/// A `dref` child naming where the media data lives.
/// See ISO 14496-12:2015 § 8.7.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEntry {
    /// `url ` with flag bit 0: the data is in this very file.
    SelfContained,
    Url { location: String },
    Urn { name: String, location: String },
}

impl DataEntry {
    fn write_box(&self, w: &mut BitStream) -> Result<()> {
        match self {
            Self::SelfContained => {
                let marker = FullBoxHeader::new(b"url ", 0, 1).start_box(w);
                marker.update_size(w)
            }
            Self::Url { location } => {
                let marker = FullBoxHeader::new(b"url ", 0, 0).start_box(w);
                w.write_zero_terminated_string(location);
                marker.update_size(w)
            }
            Self::Urn { name, location } => {
                let marker = FullBoxHeader::new(b"urn ", 0, 0).start_box(w);
                w.write_zero_terminated_string(name);
                w.write_zero_terminated_string(location);
                marker.update_size(w)
            }
        }
    }

    fn parse_box(r: &mut BitStream, tag: crate::fourcc::FourCC) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"url ", 0, 0);
        full_box.parse(r)?;
        if tag == b"urn " {
            Ok(Self::Urn {
                name: r.read_zero_terminated_string()?,
                location: r.read_zero_terminated_string()?,
            })
        } else if full_box.flags() & 1 != 0 {
            Ok(Self::SelfContained)
        } else {
            Ok(Self::Url {
                location: r.read_zero_terminated_string()?,
            })
        }
    }
}

/// `dinf`/`dref` container.
#[derive(Debug, Clone)]
pub struct DataInformationBox {
    pub entries: Vec<DataEntry>,
}

impl Default for DataInformationBox {
    fn default() -> Self {
        Self {
            entries: vec![DataEntry::SelfContained],
        }
    }
}

impl DataInformationBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let dinf = BoxHeader::new(b"dinf").start_box(w);
        let dref = FullBoxHeader::new(b"dref", 0, 0).start_box(w);
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            entry.write_box(w)?;
        }
        dref.update_size(w)?;
        dinf.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"dinf");
        header.parse(r)?;
        let (mut dref, tag) = r.read_sub_box_stream()?;
        if tag != b"dref" {
            return Err(Error::malformed("dinf without dref"));
        }
        let mut full_box = FullBoxHeader::new(b"dref", 0, 0);
        full_box.parse(&mut dref)?;
        let entry_count = dref.read_u32()?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let (mut sub, entry_tag) = dref.read_sub_box_stream()?;
            entries.push(DataEntry::parse_box(&mut sub, entry_tag)?);
        }
        Ok(Self { entries })
    }
}

/// Sample-to-group assignment `sbgp`. See ISO 14496-12:2015 § 8.9.2
#[derive(Debug, Clone)]
pub struct SampleToGroupBox {
    pub grouping_type: FourCC,
    /// (sample_count, group_description_index) runs.
    pub entries: Vec<(u32, u32)>,
}

impl SampleToGroupBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"sbgp", 0, 0).start_box(w);
        w.write_u32(self.grouping_type.value());
        w.write_u32(self.entries.len() as u32);
        for &(sample_count, group_description_index) in &self.entries {
            w.write_u32(sample_count);
            w.write_u32(group_description_index);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"sbgp", 0, 0);
        full_box.parse(r)?;
        if full_box.version() > 1 {
            return Err(Error::parse(r.position(), "unsupported sbgp version"));
        }
        let grouping_type = FourCC::from(r.read_u32()?);
        if full_box.version() == 1 {
            r.read_u32()?; // grouping_type_parameter
        }
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push((r.read_u32()?, r.read_u32()?));
        }
        Ok(Self {
            grouping_type,
            entries,
        })
    }
}

/// Sample group descriptions `sgpd`, version 1 with a default length and
/// opaque description payloads. See ISO 14496-12:2015 § 8.9.3
#[derive(Debug, Clone)]
pub struct SampleGroupDescriptionBox {
    pub grouping_type: FourCC,
    pub default_length: u32,
    pub descriptions: Vec<Vec<u8>>,
}

impl SampleGroupDescriptionBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"sgpd", 1, 0).start_box(w);
        w.write_u32(self.grouping_type.value());
        w.write_u32(self.default_length);
        w.write_u32(self.descriptions.len() as u32);
        for description in &self.descriptions {
            if self.default_length == 0 {
                w.write_u32(description.len() as u32);
            }
            w.write_bytes(description);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"sgpd", 0, 0);
        full_box.parse(r)?;
        if full_box.version() != 1 {
            return Err(Error::parse(r.position(), "unsupported sgpd version"));
        }
        let grouping_type = FourCC::from(r.read_u32()?);
        let default_length = r.read_u32()?;
        let entry_count = r.read_u32()?;
        let mut descriptions = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let length = if default_length == 0 {
                r.read_u32()?
            } else {
                default_length
            };
            descriptions.push(r.read_bytes(u64::from(length))?);
        }
        Ok(Self {
            grouping_type,
            default_length,
            descriptions,
        })
    }
}

/// An entry of the sample description box.
#[derive(Debug, Clone)]
pub enum SampleEntry {
    Visual(VisualSampleEntry),
    Audio(AudioSampleEntry),
    Raw(RawBox),
}

impl SampleEntry {
    fn write_box(&self, w: &mut BitStream) -> Result<()> {
        match self {
            Self::Visual(entry) => entry.write_box(w),
            Self::Audio(entry) => entry.write_box(w),
            Self::Raw(entry) => entry.write_box(w),
        }
    }
}

/// The flattened sample tables of one track.
#[derive(Debug, Clone, Default)]
pub struct SampleTableBox {
    pub entries: Vec<SampleEntry>,
    /// (sample_count, sample_delta) runs for `stts`.
    pub time_to_sample: Vec<(u32, u32)>,
    /// (sample_count, composition_offset) runs for `ctts`, when present.
    pub composition_offsets: Vec<(u32, u32)>,
    /// (first_chunk, samples_per_chunk, sample_description_index).
    pub sample_to_chunk: Vec<(u32, u32, u32)>,
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
    /// 1-based sync sample numbers; `None` means every sample is sync.
    pub sync_samples: Option<Vec<u32>>,
}

impl SampleTableBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"stbl").start_box(w);

        let stsd = FullBoxHeader::new(b"stsd", 0, 0).start_box(w);
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            entry.write_box(w)?;
        }
        stsd.update_size(w)?;

        let stts = FullBoxHeader::new(b"stts", 0, 0).start_box(w);
        w.write_u32(self.time_to_sample.len() as u32);
        for &(count, delta) in &self.time_to_sample {
            w.write_u32(count);
            w.write_u32(delta);
        }
        stts.update_size(w)?;

        if !self.composition_offsets.is_empty() {
            let ctts = FullBoxHeader::new(b"ctts", 0, 0).start_box(w);
            w.write_u32(self.composition_offsets.len() as u32);
            for &(count, offset) in &self.composition_offsets {
                w.write_u32(count);
                w.write_u32(offset);
            }
            ctts.update_size(w)?;
        }

        let stsc = FullBoxHeader::new(b"stsc", 0, 0).start_box(w);
        w.write_u32(self.sample_to_chunk.len() as u32);
        for &(first_chunk, samples_per_chunk, description_index) in &self.sample_to_chunk {
            w.write_u32(first_chunk);
            w.write_u32(samples_per_chunk);
            w.write_u32(description_index);
        }
        stsc.update_size(w)?;

        let stsz = FullBoxHeader::new(b"stsz", 0, 0).start_box(w);
        w.write_u32(0); // sample_size: sizes given per sample
        w.write_u32(self.sample_sizes.len() as u32);
        for &size in &self.sample_sizes {
            w.write_u32(size);
        }
        stsz.update_size(w)?;

        // stco carries 32-bit offsets; co64 is used exactly when an offset
        // does not fit.
        let needs_co64 = self.chunk_offsets.iter().any(|&o| o > u64::from(u32::MAX));
        if needs_co64 {
            let co64 = FullBoxHeader::new(b"co64", 0, 0).start_box(w);
            w.write_u32(self.chunk_offsets.len() as u32);
            for &offset in &self.chunk_offsets {
                w.write_u64(offset);
            }
            co64.update_size(w)?;
        } else {
            let stco = FullBoxHeader::new(b"stco", 0, 0).start_box(w);
            w.write_u32(self.chunk_offsets.len() as u32);
            for &offset in &self.chunk_offsets {
                w.write_u32(offset as u32);
            }
            stco.update_size(w)?;
        }

        if let Some(sync_samples) = &self.sync_samples {
            let stss = FullBoxHeader::new(b"stss", 0, 0).start_box(w);
            w.write_u32(sync_samples.len() as u32);
            for &sample in sync_samples {
                w.write_u32(sample);
            }
            stss.update_size(w)?;
        }

        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"stbl");
        header.parse(r)?;
        let mut stbl = Self::default();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"stsd" => {
                    let mut full_box = FullBoxHeader::new(b"stsd", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    for _ in 0..entry_count {
                        let position = sub.position();
                        let (mut entry_stream, entry_tag) = sub.read_sub_box_stream()?;
                        let entry = match &entry_tag.to_bytes() {
                            b"hvc1" | b"avc1" | b"lhv1" | b"vvc1" => {
                                SampleEntry::Visual(VisualSampleEntry::parse_box(&mut entry_stream)?)
                            }
                            b"mp4a" => {
                                SampleEntry::Audio(AudioSampleEntry::parse_box(&mut entry_stream)?)
                            }
                            _ => {
                                debug!("opaque sample entry '{entry_tag}' at {position}");
                                SampleEntry::Raw(RawBox::parse_box(&mut entry_stream)?)
                            }
                        };
                        stbl.entries.push(entry);
                    }
                }
                b"stts" => {
                    let mut full_box = FullBoxHeader::new(b"stts", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    for _ in 0..entry_count {
                        stbl.time_to_sample.push((sub.read_u32()?, sub.read_u32()?));
                    }
                }
                b"ctts" => {
                    let mut full_box = FullBoxHeader::new(b"ctts", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    for _ in 0..entry_count {
                        stbl.composition_offsets
                            .push((sub.read_u32()?, sub.read_u32()?));
                    }
                }
                b"stsc" => {
                    let mut full_box = FullBoxHeader::new(b"stsc", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    for _ in 0..entry_count {
                        stbl.sample_to_chunk.push((
                            sub.read_u32()?,
                            sub.read_u32()?,
                            sub.read_u32()?,
                        ));
                    }
                }
                b"stsz" => {
                    let mut full_box = FullBoxHeader::new(b"stsz", 0, 0);
                    full_box.parse(&mut sub)?;
                    let sample_size = sub.read_u32()?;
                    let sample_count = sub.read_u32()?;
                    for _ in 0..sample_count {
                        let size = if sample_size == 0 {
                            sub.read_u32()?
                        } else {
                            sample_size
                        };
                        stbl.sample_sizes.push(size);
                    }
                }
                b"stco" => {
                    let mut full_box = FullBoxHeader::new(b"stco", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    for _ in 0..entry_count {
                        stbl.chunk_offsets.push(u64::from(sub.read_u32()?));
                    }
                }
                b"co64" => {
                    let mut full_box = FullBoxHeader::new(b"co64", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    for _ in 0..entry_count {
                        stbl.chunk_offsets.push(sub.read_u64()?);
                    }
                }
                b"stss" => {
                    let mut full_box = FullBoxHeader::new(b"stss", 0, 0);
                    full_box.parse(&mut sub)?;
                    let entry_count = sub.read_u32()?;
                    let mut sync = Vec::new();
                    for _ in 0..entry_count {
                        sync.push(sub.read_u32()?);
                    }
                    stbl.sync_samples = Some(sync);
                }
                other => debug!("skipping stbl child '{}'", FourCC::new(other)),
            }
        }
        Ok(stbl)
    }
}

/// One complete track.
#[derive(Debug, Clone)]
pub struct TrackBox {
    pub tkhd: TrackHeaderBox,
    pub tref: TrackReferenceBox,
    pub edts: EditBox,
    pub mdhd: MediaHeaderBox,
    pub handler_type: FourCC,
    pub media_type_header: MediaTypeHeader,
    pub stbl: SampleTableBox,
}

impl TrackBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"trak").start_box(w);
        self.tkhd.write_box(w)?;
        if !self.tref.is_empty() {
            self.tref.write_box(w)?;
        }
        if !self.edts.is_empty() {
            self.edts.write_box(w)?;
        }
        let mdia = BoxHeader::new(b"mdia").start_box(w);
        self.mdhd.write_box(w)?;
        HandlerBox::new(self.handler_type).write_box(w)?;
        let minf = BoxHeader::new(b"minf").start_box(w);
        self.media_type_header.write_box(w)?;
        DataInformationBox::default().write_box(w)?;
        self.stbl.write_box(w)?;
        minf.update_size(w)?;
        mdia.update_size(w)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"trak");
        header.parse(r)?;
        let mut tkhd = None;
        let mut tref = TrackReferenceBox::default();
        let mut edts = EditBox::default();
        let mut mdhd = None;
        let mut handler_type = None;
        let mut stbl = None;
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"tkhd" => tkhd = Some(TrackHeaderBox::parse_box(&mut sub)?),
                b"tref" => tref = TrackReferenceBox::parse_box(&mut sub)?,
                b"edts" => edts = EditBox::parse_box(&mut sub)?,
                b"mdia" => {
                    let mut mdia_header = BoxHeader::new(b"mdia");
                    mdia_header.parse(&mut sub)?;
                    while sub.num_bytes_left() > 0 {
                        let (mut inner, inner_tag) = sub.read_sub_box_stream()?;
                        match &inner_tag.to_bytes() {
                            b"mdhd" => mdhd = Some(MediaHeaderBox::parse_box(&mut inner)?),
                            b"hdlr" => {
                                handler_type =
                                    Some(HandlerBox::parse_box(&mut inner)?.handler_type);
                            }
                            b"minf" => {
                                let mut minf_header = BoxHeader::new(b"minf");
                                minf_header.parse(&mut inner)?;
                                while inner.num_bytes_left() > 0 {
                                    let (mut leaf, leaf_tag) = inner.read_sub_box_stream()?;
                                    if leaf_tag == b"stbl" {
                                        stbl = Some(SampleTableBox::parse_box(&mut leaf)?);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(Self {
            tkhd: tkhd.ok_or(Error::malformed("trak without tkhd"))?,
            tref,
            edts,
            mdhd: mdhd.ok_or(Error::malformed("trak without mdhd"))?,
            handler_type: handler_type.ok_or(Error::malformed("trak without hdlr"))?,
            media_type_header: MediaTypeHeader::Video,
            stbl: stbl.ok_or(Error::malformed("trak without stbl"))?,
        })
    }
}

/// The `moov` container.
#[derive(Debug, Clone, Default)]
pub struct MovieBox {
    pub mvhd: MovieHeaderBox,
    pub tracks: Vec<TrackBox>,
    pub mvex: Option<MovieExtendsBox>,
}

impl MovieBox {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"moov").start_box(w);
        self.mvhd.write_box(w)?;
        for track in &self.tracks {
            track.write_box(w)?;
        }
        if let Some(mvex) = &self.mvex {
            mvex.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"moov");
        header.parse(r)?;
        let mut movie = Self::default();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"mvhd" => movie.mvhd = MovieHeaderBox::parse_box(&mut sub)?,
                b"trak" => movie.tracks.push(TrackBox::parse_box(&mut sub)?),
                b"mvex" => movie.mvex = Some(MovieExtendsBox::parse_box(&mut sub)?),
                other => debug!("skipping moov child '{}'", FourCC::new(other)),
            }
        }
        Ok(movie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hevc::HevcDecoderConfigurationRecord;
    use crate::codec::DecoderConfig;

    fn sample_track() -> TrackBox {
        let config = DecoderConfig::Hevc(HevcDecoderConfigurationRecord::default());
        let mut entry = VisualSampleEntry::new(FourCC::new(b"hvc1"), 320, 240, config);
        entry.ccst = Some(Default::default());
        let mut tkhd = TrackHeaderBox::new(1);
        tkhd.width = 320;
        tkhd.height = 240;
        tkhd.duration = 3000;
        TrackBox {
            tkhd,
            tref: TrackReferenceBox::default(),
            edts: EditBox::default(),
            mdhd: MediaHeaderBox {
                timescale: 90_000,
                duration: 270_000,
            },
            handler_type: FourCC::new(b"pict"),
            media_type_header: MediaTypeHeader::Video,
            stbl: SampleTableBox {
                entries: vec![SampleEntry::Visual(entry)],
                time_to_sample: vec![(3, 30_000)],
                composition_offsets: vec![],
                sample_to_chunk: vec![(1, 3, 1)],
                sample_sizes: vec![100, 200, 300],
                chunk_offsets: vec![4242],
                sync_samples: Some(vec![1]),
            },
        }
    }

    #[test]
    fn movie_round_trips_sample_tables() {
        let mut movie = MovieBox::default();
        movie.mvhd.timescale = 1000;
        movie.mvhd.duration = 3000;
        movie.mvhd.next_track_id = 2;
        movie.tracks.push(sample_track());

        let mut w = BitStream::new();
        movie.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"moov");
        let parsed = MovieBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.mvhd.next_track_id, 2);
        let track = &parsed.tracks[0];
        assert_eq!(track.tkhd.width, 320);
        assert_eq!(track.stbl.sample_sizes, vec![100, 200, 300]);
        assert_eq!(track.stbl.chunk_offsets, vec![4242]);
        assert_eq!(track.stbl.sync_samples.as_deref(), Some(&[1][..]));
        assert_eq!(track.mdhd.timescale, 90_000);
        assert_eq!(track.handler_type, b"pict");
    }

    #[test]
    fn chunk_offsets_past_u32_switch_to_co64() {
        let mut track = sample_track();
        track.stbl.chunk_offsets = vec![u64::from(u32::MAX) + 1];
        let mut w = BitStream::new();
        track.stbl.write_box(&mut w).unwrap();
        let bytes = w.storage().to_vec();
        assert!(bytes.windows(4).any(|win| win == b"co64"));
        assert!(!bytes.windows(4).any(|win| win == b"stco"));

        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = SampleTableBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.chunk_offsets, vec![u64::from(u32::MAX) + 1]);
    }

    #[test]
    fn data_reference_entries_round_trip() {
        let dinf = DataInformationBox {
            entries: vec![
                DataEntry::SelfContained,
                DataEntry::Urn {
                    name: "urn:example:media".into(),
                    location: "media.bin".into(),
                },
            ],
        };
        let mut w = BitStream::new();
        dinf.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = DataInformationBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.entries, dinf.entries);
    }

    #[test]
    fn sample_groups_round_trip() {
        let sbgp = SampleToGroupBox {
            grouping_type: FourCC::new(b"refs"),
            entries: vec![(3, 1), (1, 0)],
        };
        let sgpd = SampleGroupDescriptionBox {
            grouping_type: FourCC::new(b"refs"),
            default_length: 0,
            descriptions: vec![vec![0x01], vec![0x02, 0x03]],
        };
        let mut w = BitStream::new();
        sbgp.write_box(&mut w).unwrap();
        sgpd.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"sbgp");
        let parsed = SampleToGroupBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.entries, vec![(3, 1), (1, 0)]);
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"sgpd");
        let parsed = SampleGroupDescriptionBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.descriptions[1], vec![0x02, 0x03]);
    }

    #[test]
    fn edit_list_round_trips() {
        let mut edit = EditBox::default();
        edit.entries.push(EditUnit {
            segment_duration: 1000,
            media_time: -1,
            media_rate_integer: 1,
        });
        let mut w = BitStream::new();
        edit.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = EditBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.entries[0].media_time, -1);
        assert_eq!(parsed.entries[0].segment_duration, 1000);
    }
}
