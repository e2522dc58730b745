//! Movie fragment boxes. See ISO 14496-12:2015 § 8.8

use crate::bitstream::BitStream;
use crate::boxes::{BoxHeader, FullBoxHeader};
use crate::{Error, Result};

/// Track extends defaults `trex`. See ISO 14496-12:2015 § 8.8.3
#[derive(Debug, Clone, Default)]
pub struct TrackExtendsBox {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TrackExtendsBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"trex", 0, 0).start_box(w);
        w.write_u32(self.track_id);
        w.write_u32(self.default_sample_description_index);
        w.write_u32(self.default_sample_duration);
        w.write_u32(self.default_sample_size);
        w.write_u32(self.default_sample_flags);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"trex", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            track_id: r.read_u32()?,
            default_sample_description_index: r.read_u32()?,
            default_sample_duration: r.read_u32()?,
            default_sample_size: r.read_u32()?,
            default_sample_flags: r.read_u32()?,
        })
    }
}

/// Movie extends `mvex` with an optional `mehd`.
/// See ISO 14496-12:2015 § 8.8.1
#[derive(Debug, Clone, Default)]
pub struct MovieExtendsBox {
    pub fragment_duration: Option<u64>,
    pub track_extends: Vec<TrackExtendsBox>,
}

impl MovieExtendsBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"mvex").start_box(w);
        if let Some(duration) = self.fragment_duration {
            let version = if duration > u64::from(u32::MAX) { 1 } else { 0 };
            let mehd = FullBoxHeader::new(b"mehd", version, 0).start_box(w);
            if version == 1 {
                w.write_u64(duration);
            } else {
                w.write_u32(duration as u32);
            }
            mehd.update_size(w)?;
        }
        for trex in &self.track_extends {
            trex.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"mvex");
        header.parse(r)?;
        let mut mvex = Self::default();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"mehd" => {
                    let mut full_box = FullBoxHeader::new(b"mehd", 0, 0);
                    full_box.parse(&mut sub)?;
                    mvex.fragment_duration = Some(if full_box.version() == 1 {
                        sub.read_u64()?
                    } else {
                        u64::from(sub.read_u32()?)
                    });
                }
                b"trex" => mvex.track_extends.push(TrackExtendsBox::parse_box(&mut sub)?),
                _ => {}
            }
        }
        Ok(mvex)
    }
}

/// Base-data-offset policy for a track fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentBaseOffset {
    /// Offsets are relative to the first byte of the enclosing `moof`.
    RelativeToMoof,
    /// An absolute file offset patched in once the layout is known.
    Absolute(u64),
}

/// Track fragment header `tfhd`. See ISO 14496-12:2015 § 8.8.7
#[derive(Debug, Clone)]
pub struct TrackFragmentHeaderBox {
    pub track_id: u32,
    pub base_offset: FragmentBaseOffset,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
}

impl TrackFragmentHeaderBox {
    const BASE_DATA_OFFSET_PRESENT: u32 = 0x1;
    const DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x8;
    const DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x10;
    const DEFAULT_BASE_IS_MOOF: u32 = 0x2_0000;

    fn flags(&self) -> u32 {
        let mut flags = 0;
        match self.base_offset {
            FragmentBaseOffset::RelativeToMoof => flags |= Self::DEFAULT_BASE_IS_MOOF,
            FragmentBaseOffset::Absolute(_) => flags |= Self::BASE_DATA_OFFSET_PRESENT,
        }
        if self.default_sample_duration.is_some() {
            flags |= Self::DEFAULT_SAMPLE_DURATION_PRESENT;
        }
        if self.default_sample_size.is_some() {
            flags |= Self::DEFAULT_SAMPLE_SIZE_PRESENT;
        }
        flags
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"tfhd", 0, self.flags()).start_box(w);
        w.write_u32(self.track_id);
        if let FragmentBaseOffset::Absolute(offset) = self.base_offset {
            w.write_u64(offset);
        }
        if let Some(duration) = self.default_sample_duration {
            w.write_u32(duration);
        }
        if let Some(size) = self.default_sample_size {
            w.write_u32(size);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"tfhd", 0, 0);
        full_box.parse(r)?;
        let flags = full_box.flags();
        let track_id = r.read_u32()?;
        let base_offset = if flags & Self::BASE_DATA_OFFSET_PRESENT != 0 {
            FragmentBaseOffset::Absolute(r.read_u64()?)
        } else if flags & Self::DEFAULT_BASE_IS_MOOF != 0 {
            FragmentBaseOffset::RelativeToMoof
        } else {
            return Err(Error::parse(r.position(), "tfhd without a base offset mode"));
        };
        let default_sample_duration = if flags & Self::DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_size = if flags & Self::DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        Ok(Self {
            track_id,
            base_offset,
            default_sample_duration,
            default_sample_size,
        })
    }
}

/// Track fragment decode time `tfdt`. See ISO 14496-12:2015 § 8.8.12
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackFragmentBaseMediaDecodeTimeBox {
    pub base_media_decode_time: u64,
}

impl TrackFragmentBaseMediaDecodeTimeBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let version = if self.base_media_decode_time > u64::from(u32::MAX) {
            1
        } else {
            0
        };
        let marker = FullBoxHeader::new(b"tfdt", version, 0).start_box(w);
        if version == 1 {
            w.write_u64(self.base_media_decode_time);
        } else {
            w.write_u32(self.base_media_decode_time as u32);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"tfdt", 0, 0);
        full_box.parse(r)?;
        let base_media_decode_time = if full_box.version() == 1 {
            r.read_u64()?
        } else {
            u64::from(r.read_u32()?)
        };
        Ok(Self {
            base_media_decode_time,
        })
    }
}

/// One sample row of a `trun`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackRunSample {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    pub composition_time_offset: u32,
}

/// Track run `trun` with per-sample durations, sizes, flags and composition
/// offsets all present. See ISO 14496-12:2015 § 8.8.8
#[derive(Debug, Clone, Default)]
pub struct TrackRunBox {
    pub data_offset: Option<i32>,
    pub samples: Vec<TrackRunSample>,
}

impl TrackRunBox {
    const DATA_OFFSET_PRESENT: u32 = 0x1;
    const SAMPLE_DURATION_PRESENT: u32 = 0x100;
    const SAMPLE_SIZE_PRESENT: u32 = 0x200;
    const SAMPLE_FLAGS_PRESENT: u32 = 0x400;
    const SAMPLE_CT_OFFSETS_PRESENT: u32 = 0x800;

    fn flags(&self) -> u32 {
        let mut flags = Self::SAMPLE_DURATION_PRESENT
            | Self::SAMPLE_SIZE_PRESENT
            | Self::SAMPLE_FLAGS_PRESENT
            | Self::SAMPLE_CT_OFFSETS_PRESENT;
        if self.data_offset.is_some() {
            flags |= Self::DATA_OFFSET_PRESENT;
        }
        flags
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"trun", 0, self.flags()).start_box(w);
        w.write_u32(self.samples.len() as u32);
        if let Some(data_offset) = self.data_offset {
            w.write_u32(data_offset as u32);
        }
        for sample in &self.samples {
            w.write_u32(sample.duration);
            w.write_u32(sample.size);
            w.write_u32(sample.flags);
            w.write_u32(sample.composition_time_offset);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"trun", 0, 0);
        full_box.parse(r)?;
        let flags = full_box.flags();
        let sample_count = r.read_u32()?;
        let data_offset = if flags & Self::DATA_OFFSET_PRESENT != 0 {
            Some(r.read_u32()? as i32)
        } else {
            None
        };
        if flags & Self::SAMPLE_CT_OFFSETS_PRESENT == 0
            || flags & Self::SAMPLE_DURATION_PRESENT == 0
            || flags & Self::SAMPLE_SIZE_PRESENT == 0
            || flags & Self::SAMPLE_FLAGS_PRESENT == 0
        {
            return Err(Error::parse(
                r.position(),
                "trun without per-sample fields is not supported",
            ));
        }
        let mut run = Self {
            data_offset,
            samples: Vec::with_capacity(sample_count as usize),
        };
        for _ in 0..sample_count {
            run.samples.push(TrackRunSample {
                duration: r.read_u32()?,
                size: r.read_u32()?,
                flags: r.read_u32()?,
                composition_time_offset: r.read_u32()?,
            });
        }
        Ok(run)
    }
}

/// Track fragment `traf`. See ISO 14496-12:2015 § 8.8.6
#[derive(Debug, Clone)]
pub struct TrackFragmentBox {
    pub tfhd: TrackFragmentHeaderBox,
    pub tfdt: Option<TrackFragmentBaseMediaDecodeTimeBox>,
    pub runs: Vec<TrackRunBox>,
}

impl TrackFragmentBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"traf").start_box(w);
        self.tfhd.write_box(w)?;
        if let Some(tfdt) = &self.tfdt {
            tfdt.write_box(w)?;
        }
        for run in &self.runs {
            run.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"traf");
        header.parse(r)?;
        let mut tfhd = None;
        let mut tfdt = None;
        let mut runs = Vec::new();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"tfhd" => tfhd = Some(TrackFragmentHeaderBox::parse_box(&mut sub)?),
                b"tfdt" => tfdt = Some(TrackFragmentBaseMediaDecodeTimeBox::parse_box(&mut sub)?),
                b"trun" => runs.push(TrackRunBox::parse_box(&mut sub)?),
                _ => {}
            }
        }
        Ok(Self {
            tfhd: tfhd.ok_or(Error::malformed("traf without tfhd"))?,
            tfdt,
            runs,
        })
    }
}

/// Movie fragment `moof`. See ISO 14496-12:2015 § 8.8.4
#[derive(Debug, Clone)]
pub struct MovieFragmentBox {
    pub sequence_number: u32,
    pub track_fragments: Vec<TrackFragmentBox>,
}

impl MovieFragmentBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"moof").start_box(w);
        let mfhd = FullBoxHeader::new(b"mfhd", 0, 0).start_box(w);
        w.write_u32(self.sequence_number);
        mfhd.update_size(w)?;
        for traf in &self.track_fragments {
            traf.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"moof");
        header.parse(r)?;
        let mut sequence_number = 0;
        let mut track_fragments = Vec::new();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"mfhd" => {
                    let mut full_box = FullBoxHeader::new(b"mfhd", 0, 0);
                    full_box.parse(&mut sub)?;
                    sequence_number = sub.read_u32()?;
                }
                b"traf" => track_fragments.push(TrackFragmentBox::parse_box(&mut sub)?),
                _ => {}
            }
        }
        Ok(Self {
            sequence_number,
            track_fragments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tfhd_base_offset_modes_round_trip() {
        for base_offset in [
            FragmentBaseOffset::RelativeToMoof,
            FragmentBaseOffset::Absolute(0x1_2345_6789),
        ] {
            let tfhd = TrackFragmentHeaderBox {
                track_id: 3,
                base_offset,
                default_sample_duration: Some(3000),
                default_sample_size: None,
            };
            let mut w = BitStream::new();
            tfhd.write_box(&mut w).unwrap();
            w.reset();
            let (mut sub, _) = w.read_sub_box_stream().unwrap();
            let parsed = TrackFragmentHeaderBox::parse_box(&mut sub).unwrap();
            assert_eq!(parsed.base_offset, base_offset);
            assert_eq!(parsed.default_sample_duration, Some(3000));
            assert_eq!(parsed.default_sample_size, None);
        }
    }

    #[test]
    fn fragment_tree_round_trips() {
        let moof = MovieFragmentBox {
            sequence_number: 7,
            track_fragments: vec![TrackFragmentBox {
                tfhd: TrackFragmentHeaderBox {
                    track_id: 1,
                    base_offset: FragmentBaseOffset::RelativeToMoof,
                    default_sample_duration: None,
                    default_sample_size: None,
                },
                tfdt: Some(TrackFragmentBaseMediaDecodeTimeBox {
                    base_media_decode_time: u64::from(u32::MAX) + 5,
                }),
                runs: vec![TrackRunBox {
                    data_offset: Some(160),
                    samples: vec![TrackRunSample {
                        duration: 3000,
                        size: 999,
                        flags: 0,
                        composition_time_offset: 0,
                    }],
                }],
            }],
        };
        let mut w = BitStream::new();
        moof.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"moof");
        let parsed = MovieFragmentBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.sequence_number, 7);
        let traf = &parsed.track_fragments[0];
        assert_eq!(
            traf.tfdt.unwrap().base_media_decode_time,
            u64::from(u32::MAX) + 5
        );
        assert_eq!(traf.runs[0].data_offset, Some(160));
        assert_eq!(traf.runs[0].samples[0].size, 999);
    }

    #[test]
    fn mvex_carries_defaults_per_track() {
        let mvex = MovieExtendsBox {
            fragment_duration: Some(12_000),
            track_extends: vec![TrackExtendsBox {
                track_id: 1,
                default_sample_description_index: 1,
                default_sample_duration: 3000,
                default_sample_size: 0,
                default_sample_flags: 0x0101_0000,
            }],
        };
        let mut w = BitStream::new();
        mvex.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = MovieExtendsBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.fragment_duration, Some(12_000));
        assert_eq!(parsed.track_extends[0].default_sample_flags, 0x0101_0000);
    }
}
