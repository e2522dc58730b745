//! NAL-unit ingestion and decoder configuration records.
//!
//! Annex-B elementary streams come in, length-prefixed access units and a
//! codec configuration record (`hvcC`/`avcC`/`vvcC`) come out. Parameter-set
//! NAL units are hoisted into the record; everything else is copied
//! bit-exactly into samples.

use crate::bitstream::{find_start_code, BitStream};
use crate::fourcc::FourCC;
use crate::{Error, Result};

pub mod avc;
pub mod hevc;
pub mod nal;
pub mod vvc;

pub use nal::{parse_annexb, parse_annexb_file, ParsedBitstream, Sample};

/// Supported elementary-stream codecs, keyed by their sample entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    Hvc1,
    /// Layered HEVC; the bitstream is parsed like HEVC.
    Lhv1,
    Avc1,
    Vvc1,
}

impl CodeType {
    pub fn from_tag(tag: FourCC) -> Result<Self> {
        match &tag.to_bytes() {
            b"hvc1" => Ok(Self::Hvc1),
            b"lhv1" => Ok(Self::Lhv1),
            b"avc1" => Ok(Self::Avc1),
            b"vvc1" => Ok(Self::Vvc1),
            _ => Err(Error::UnsupportedCodec(tag)),
        }
    }

    pub fn tag(self) -> FourCC {
        match self {
            Self::Hvc1 => FourCC::new(b"hvc1"),
            Self::Lhv1 => FourCC::new(b"lhv1"),
            Self::Avc1 => FourCC::new(b"avc1"),
            Self::Vvc1 => FourCC::new(b"vvc1"),
        }
    }
}

/// Parameter-set NAL units of one type inside a configuration record.
#[derive(Debug, Clone)]
pub struct NalArray {
    pub array_completeness: bool,
    pub nal_unit_type: u8,
    /// NAL unit payloads without start codes.
    pub nal_units: Vec<Vec<u8>>,
}

/// File an incoming parameter set into the array for its NAL unit type,
/// creating the array on first use. A leading start code is dropped.
pub(crate) fn add_nal_unit(
    arrays: &mut Vec<NalArray>,
    nal_unit_type: u8,
    array_completeness: bool,
    nal_unit: &[u8],
) {
    let payload = match find_start_code(nal_unit, 0) {
        (0, len) if len > 0 => &nal_unit[len..],
        _ => nal_unit,
    };
    if let Some(array) = arrays.iter_mut().find(|a| a.nal_unit_type == nal_unit_type) {
        array.nal_units.push(payload.to_vec());
        return;
    }
    arrays.push(NalArray {
        array_completeness,
        nal_unit_type,
        nal_units: vec![payload.to_vec()],
    });
}

/// A synthesized decoder configuration record for one bitstream.
#[derive(Debug, Clone)]
pub enum DecoderConfig {
    Hevc(hevc::HevcDecoderConfigurationRecord),
    Avc(avc::AvcDecoderConfigurationRecord),
    Vvc(vvc::VvcDecoderConfigurationRecord),
}

impl DecoderConfig {
    /// Coded picture width after conformance-window cropping.
    pub fn pic_width(&self) -> u32 {
        match self {
            Self::Hevc(record) => u32::from(record.pic_width()),
            Self::Avc(record) => u32::from(record.pic_width),
            Self::Vvc(record) => u32::from(record.max_picture_width),
        }
    }

    /// Coded picture height after conformance-window cropping.
    pub fn pic_height(&self) -> u32 {
        match self {
            Self::Hevc(record) => u32::from(record.pic_height()),
            Self::Avc(record) => u32::from(record.pic_height),
            Self::Vvc(record) => u32::from(record.max_picture_height),
        }
    }

    pub fn write_record(&self, w: &mut BitStream) -> Result<()> {
        match self {
            Self::Hevc(record) => record.write_record(w),
            Self::Avc(record) => record.write_record(w),
            Self::Vvc(record) => record.write_record(w),
        }
    }
}
