//! Sample entries for `stsd`. See ISO 14496-12:2015 § 8.5.2 and
//! ISO 14496-15 for the codec-specific entries.

use crate::bitstream::BitStream;
use crate::boxes::codecbox::{AvcConfigurationBox, HevcConfigurationBox, VvcConfigurationBox};
use crate::boxes::properties::CleanApertureBox;
use crate::boxes::{BoxHeader, FullBoxHeader};
use crate::codec::DecoderConfig;
use crate::fourcc::FourCC;
use crate::{Error, Result};

/// Compressor name stored as a 1-byte length plus a fixed 31-byte buffer.
const COMPRESSOR_NAME_PAD: usize = 31;

/// Coding constraints `ccst`, required in image-sequence sample entries.
/// See ISO 23008-12:2017 § 7.2.2
#[derive(Debug, Clone)]
pub struct CodingConstraintsBox {
    pub all_ref_pics_intra: bool,
    pub intra_pred_used: bool,
    /// 15 means unknown.
    pub max_ref_pic_used: u8,
}

impl Default for CodingConstraintsBox {
    fn default() -> Self {
        Self {
            all_ref_pics_intra: true,
            intra_pred_used: false,
            max_ref_pic_used: 15,
        }
    }
}

impl CodingConstraintsBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"ccst", 0, 0).start_box(w);
        w.write_bits(u64::from(self.all_ref_pics_intra), 1);
        w.write_bits(u64::from(self.intra_pred_used), 1);
        w.write_bits(u64::from(self.max_ref_pic_used), 4);
        w.write_bits(0, 26); // reserved
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"ccst", 0, 0);
        full_box.parse(r)?;
        let all_ref_pics_intra = r.read_bits(1)? != 0;
        let intra_pred_used = r.read_bits(1)? != 0;
        let max_ref_pic_used = r.read_bits(4)? as u8;
        r.read_bits(26)?; // reserved
        Ok(Self {
            all_ref_pics_intra,
            intra_pred_used,
            max_ref_pic_used,
        })
    }
}

/// Auxiliary type info `auxi` for auxiliary image-sequence tracks.
/// See ISO 23008-12:2017 § 7.5.3.1
#[derive(Debug, Clone)]
pub struct AuxiliaryTypeInfoBox {
    pub aux_track_type: String,
}

impl AuxiliaryTypeInfoBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"auxi", 0, 0).start_box(w);
        w.write_zero_terminated_string(&self.aux_track_type);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"auxi", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            aux_track_type: r.read_zero_terminated_string()?,
        })
    }
}

/// A visual sample entry (`hvc1`, `avc1`, `lhv1`, `vvc1`) embedding its
/// decoder configuration box.
#[derive(Debug, Clone)]
pub struct VisualSampleEntry {
    pub entry_type: FourCC,
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub compressor_name: String,
    pub config: DecoderConfig,
    pub ccst: Option<CodingConstraintsBox>,
    pub clap: Option<CleanApertureBox>,
    pub auxi: Option<AuxiliaryTypeInfoBox>,
}

impl VisualSampleEntry {
    pub fn new(entry_type: FourCC, width: u16, height: u16, config: DecoderConfig) -> Self {
        let compressor_name = match &config {
            DecoderConfig::Hevc(_) => "HEVC Coding",
            DecoderConfig::Avc(_) => "AVC Coding",
            DecoderConfig::Vvc(_) => "VVC Coding",
        };
        Self {
            entry_type,
            data_reference_index: 1,
            width,
            height,
            compressor_name: compressor_name.into(),
            config,
            ccst: None,
            clap: None,
            auxi: None,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(&self.entry_type.to_bytes()).start_box(w);
        for _ in 0..6 {
            w.write_u8(0); // reserved
        }
        w.write_u16(self.data_reference_index);

        w.write_u16(0); // pre_defined
        w.write_u16(0); // reserved
        for _ in 0..3 {
            w.write_u32(0); // pre_defined
        }
        w.write_u16(self.width);
        w.write_u16(self.height);
        w.write_u32(0x0048_0000); // horizresolution, 72 dpi
        w.write_u32(0x0048_0000); // vertresolution, 72 dpi
        w.write_u32(0); // reserved
        w.write_u16(1); // frame_count

        let name = self.compressor_name.as_bytes();
        if name.len() > COMPRESSOR_NAME_PAD {
            return Err(Error::Inconsistent("compressorname longer than 31 bytes"));
        }
        w.write_u8(name.len() as u8);
        w.write_bytes(name);
        for _ in name.len()..COMPRESSOR_NAME_PAD {
            w.write_u8(0);
        }

        w.write_u16(0x0018); // depth
        w.write_u16(0xffff); // pre_defined = -1

        if let Some(clap) = &self.clap {
            clap.write_box(w)?;
        }
        if let Some(auxi) = &self.auxi {
            auxi.write_box(w)?;
        }
        match &self.config {
            DecoderConfig::Hevc(record) => {
                HevcConfigurationBox::new(record.clone()).write_box(w)?;
            }
            DecoderConfig::Avc(record) => {
                AvcConfigurationBox::new(record.clone()).write_box(w)?;
            }
            DecoderConfig::Vvc(record) => {
                VvcConfigurationBox::new(record.clone()).write_box(w)?;
            }
        }
        if let Some(ccst) = &self.ccst {
            ccst.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"    ");
        header.parse(r)?;
        for _ in 0..6 {
            r.read_u8()?;
        }
        let data_reference_index = r.read_u16()?;
        r.read_u16()?; // pre_defined
        r.read_u16()?; // reserved
        for _ in 0..3 {
            r.read_u32()?;
        }
        let width = r.read_u16()?;
        let height = r.read_u16()?;
        r.read_u32()?; // horizresolution
        r.read_u32()?; // vertresolution
        r.read_u32()?; // reserved
        r.read_u16()?; // frame_count
        let name_len = r.read_u8()?;
        let mut name_buf = r.read_bytes(COMPRESSOR_NAME_PAD as u64)?;
        name_buf.truncate(usize::from(name_len).min(COMPRESSOR_NAME_PAD));
        let compressor_name = String::from_utf8(name_buf)?;
        r.read_u16()?; // depth
        r.read_u16()?; // pre_defined

        let mut config = None;
        let mut ccst = None;
        let mut clap = None;
        let mut auxi = None;
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"hvcC" => {
                    config = Some(DecoderConfig::Hevc(
                        HevcConfigurationBox::parse_box(&mut sub)?.record,
                    ));
                }
                b"avcC" => {
                    config = Some(DecoderConfig::Avc(
                        AvcConfigurationBox::parse_box(&mut sub)?.record,
                    ));
                }
                b"vvcC" => {
                    config = Some(DecoderConfig::Vvc(
                        VvcConfigurationBox::parse_box(&mut sub)?.record,
                    ));
                }
                b"ccst" => ccst = Some(CodingConstraintsBox::parse_box(&mut sub)?),
                b"clap" => clap = Some(CleanApertureBox::parse_box(&mut sub)?),
                b"auxi" => auxi = Some(AuxiliaryTypeInfoBox::parse_box(&mut sub)?),
                other => debug!("skipping '{}' in sample entry", FourCC::new(other)),
            }
        }
        Ok(Self {
            entry_type: header.box_type(),
            data_reference_index,
            width,
            height,
            compressor_name,
            config: config.ok_or(Error::malformed("sample entry without decoder config"))?,
            ccst,
            clap,
            auxi,
        })
    }
}

/// MPEG-4 elementary stream descriptor `esds` carried in `mp4a`.
/// See ISO 14496-1 § 7.2.6.5
#[derive(Debug, Clone)]
pub struct ElementaryStreamDescriptorBox {
    pub es_id: u16,
    pub object_type_indication: u8,
    pub avg_bitrate: u32,
    pub max_bitrate: u32,
    pub decoder_specific_info: Vec<u8>,
}

impl ElementaryStreamDescriptorBox {
    const ES_DESCR_TAG: u8 = 0x03;
    const DECODER_CONFIG_TAG: u8 = 0x04;
    const DECODER_SPECIFIC_TAG: u8 = 0x05;
    const SL_CONFIG_TAG: u8 = 0x06;

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"esds", 0, 0).start_box(w);

        let specific_len = self.decoder_specific_info.len() as u8;
        let decoder_config_len = 13 + 2 + specific_len;
        let es_len = 3 + 2 + decoder_config_len + 3;

        w.write_u8(Self::ES_DESCR_TAG);
        w.write_u8(es_len);
        w.write_u16(self.es_id);
        w.write_u8(0); // flags and stream priority

        w.write_u8(Self::DECODER_CONFIG_TAG);
        w.write_u8(decoder_config_len);
        w.write_u8(self.object_type_indication);
        w.write_u8(0x15); // streamType audio, upStream 0, reserved 1
        w.write_u24(0); // bufferSizeDB
        w.write_u32(self.max_bitrate);
        w.write_u32(self.avg_bitrate);

        w.write_u8(Self::DECODER_SPECIFIC_TAG);
        w.write_u8(specific_len);
        w.write_bytes(&self.decoder_specific_info);

        w.write_u8(Self::SL_CONFIG_TAG);
        w.write_u8(1);
        w.write_u8(0x02); // predefined: MP4 file

        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"esds", 0, 0);
        full_box.parse(r)?;
        if r.read_u8()? != Self::ES_DESCR_TAG {
            return Err(Error::parse(r.position(), "missing ES descriptor"));
        }
        r.read_u8()?; // length
        let es_id = r.read_u16()?;
        r.read_u8()?; // flags
        if r.read_u8()? != Self::DECODER_CONFIG_TAG {
            return Err(Error::parse(r.position(), "missing decoder config descriptor"));
        }
        r.read_u8()?; // length
        let object_type_indication = r.read_u8()?;
        r.read_u8()?; // streamType
        r.read_u24()?; // bufferSizeDB
        let max_bitrate = r.read_u32()?;
        let avg_bitrate = r.read_u32()?;
        if r.read_u8()? != Self::DECODER_SPECIFIC_TAG {
            return Err(Error::parse(r.position(), "missing decoder specific info"));
        }
        let specific_len = r.read_u8()?;
        let decoder_specific_info = r.read_bytes(u64::from(specific_len))?;
        Ok(Self {
            es_id,
            object_type_indication,
            avg_bitrate,
            max_bitrate,
            decoder_specific_info,
        })
    }
}

/// `mp4a` audio sample entry.
#[derive(Debug, Clone)]
pub struct AudioSampleEntry {
    pub data_reference_index: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: u32,
    pub esds: ElementaryStreamDescriptorBox,
}

impl AudioSampleEntry {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"mp4a").start_box(w);
        for _ in 0..6 {
            w.write_u8(0); // reserved
        }
        w.write_u16(self.data_reference_index);
        w.write_u32(0); // reserved
        w.write_u32(0); // reserved
        w.write_u16(self.channel_count);
        w.write_u16(self.sample_size);
        w.write_u16(0); // pre_defined
        w.write_u16(0); // reserved
        w.write_u32(self.sample_rate << 16); // 16.16 fixed point
        self.esds.write_box(w)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"mp4a");
        header.parse(r)?;
        for _ in 0..6 {
            r.read_u8()?;
        }
        let data_reference_index = r.read_u16()?;
        r.read_u32()?;
        r.read_u32()?;
        let channel_count = r.read_u16()?;
        let sample_size = r.read_u16()?;
        r.read_u16()?;
        r.read_u16()?;
        let sample_rate = r.read_u32()? >> 16;
        let (mut sub, tag) = r.read_sub_box_stream()?;
        if tag != b"esds" {
            return Err(Error::malformed("mp4a entry without esds"));
        }
        let esds = ElementaryStreamDescriptorBox::parse_box(&mut sub)?;
        Ok(Self {
            data_reference_index,
            channel_count,
            sample_size,
            sample_rate,
            esds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hevc::HevcDecoderConfigurationRecord;

    #[test]
    fn compressor_name_occupies_exactly_32_bytes() {
        let config = DecoderConfig::Hevc(HevcDecoderConfigurationRecord::default());
        let entry = VisualSampleEntry::new(FourCC::new(b"hvc1"), 640, 480, config);
        let mut w = BitStream::new();
        entry.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"hvc1");
        let parsed = VisualSampleEntry::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.compressor_name, "HEVC Coding");
        assert_eq!(parsed.width, 640);
        assert!(matches!(parsed.config, DecoderConfig::Hevc(_)));
    }

    #[test]
    fn ccst_round_trip() {
        let ccst = CodingConstraintsBox::default();
        let mut w = BitStream::new();
        ccst.write_box(&mut w).unwrap();
        assert_eq!(w.size(), 12 + 4);
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = CodingConstraintsBox::parse_box(&mut sub).unwrap();
        assert!(parsed.all_ref_pics_intra);
        assert_eq!(parsed.max_ref_pic_used, 15);
    }

    #[test]
    fn mp4a_descriptor_chain_round_trips() {
        let entry = AudioSampleEntry {
            data_reference_index: 1,
            channel_count: 2,
            sample_size: 16,
            sample_rate: 48_000,
            esds: ElementaryStreamDescriptorBox {
                es_id: 1,
                object_type_indication: 0x40, // MPEG-4 AAC
                avg_bitrate: 128_000,
                max_bitrate: 160_000,
                decoder_specific_info: vec![0x11, 0x90],
            },
        };
        let mut w = BitStream::new();
        entry.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = AudioSampleEntry::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.sample_rate, 48_000);
        assert_eq!(parsed.esds.object_type_indication, 0x40);
        assert_eq!(parsed.esds.decoder_specific_info, vec![0x11, 0x90]);
    }
}
