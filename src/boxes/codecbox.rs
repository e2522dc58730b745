//! Decoder configuration boxes wrapping the codec records.
//! See ISO 14496-15 § 5.4.2, § 8.4.1, § 11.3.2

use crate::bitstream::BitStream;
use crate::boxes::{BoxHeader, FullBoxHeader};
use crate::codec::avc::AvcDecoderConfigurationRecord;
use crate::codec::hevc::HevcDecoderConfigurationRecord;
use crate::codec::vvc::VvcDecoderConfigurationRecord;
use crate::Result;

#[derive(Debug, Clone)]
pub struct HevcConfigurationBox {
    header: BoxHeader,
    pub record: HevcDecoderConfigurationRecord,
}

impl HevcConfigurationBox {
    pub fn new(record: HevcDecoderConfigurationRecord) -> Self {
        Self {
            header: BoxHeader::new(b"hvcC"),
            record,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        self.record.write_record(w)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"hvcC");
        header.parse(r)?;
        Ok(Self {
            header,
            record: HevcDecoderConfigurationRecord::parse_record(r)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AvcConfigurationBox {
    header: BoxHeader,
    pub record: AvcDecoderConfigurationRecord,
}

impl AvcConfigurationBox {
    pub fn new(record: AvcDecoderConfigurationRecord) -> Self {
        Self {
            header: BoxHeader::new(b"avcC"),
            record,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        self.record.write_record(w)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"avcC");
        header.parse(r)?;
        Ok(Self {
            header,
            record: AvcDecoderConfigurationRecord::parse_record(r)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VvcConfigurationBox {
    full_box: FullBoxHeader,
    pub record: VvcDecoderConfigurationRecord,
}

impl VvcConfigurationBox {
    pub fn new(record: VvcDecoderConfigurationRecord) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"vvcC", 0, 0),
            record,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        self.record.write_record(w)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"vvcC", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            full_box,
            record: VvcDecoderConfigurationRecord::parse_record(r)?,
        })
    }
}
