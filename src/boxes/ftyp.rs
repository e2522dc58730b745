//! File type box. See ISO 14496-12:2015 § 4.3

use crate::bitstream::BitStream;
use crate::boxes::BoxHeader;
use crate::fourcc::FourCC;
use crate::Result;

#[derive(Debug, Clone)]
pub struct FileTypeBox {
    header: BoxHeader,
    major_brand: FourCC,
    minor_version: u32,
    compatible_brands: Vec<FourCC>,
}

impl FileTypeBox {
    pub fn new(major_brand: FourCC) -> Self {
        Self {
            header: BoxHeader::new(b"ftyp"),
            major_brand,
            minor_version: 0,
            compatible_brands: Vec::new(),
        }
    }

    pub fn major_brand(&self) -> FourCC {
        self.major_brand
    }

    pub fn minor_version(&self) -> u32 {
        self.minor_version
    }

    pub fn compatible_brands(&self) -> &[FourCC] {
        &self.compatible_brands
    }

    /// Add a brand unless it is already listed.
    pub fn add_compatible_brand(&mut self, brand: FourCC) {
        if !self.compatible_brands.contains(&brand) {
            self.compatible_brands.push(brand);
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        w.write_u32(self.major_brand.value());
        w.write_u32(self.minor_version);
        for brand in &self.compatible_brands {
            w.write_u32(brand.value());
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"ftyp");
        header.parse(r)?;
        let major_brand = FourCC::from(r.read_u32()?);
        let minor_version = r.read_u32()?;
        let mut compatible_brands = Vec::new();
        while r.num_bytes_left() >= 4 {
            compatible_brands.push(FourCC::from(r.read_u32()?));
        }
        Ok(Self {
            header,
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brands_are_deduplicated() {
        let mut ftyp = FileTypeBox::new(FourCC::new(b"heic"));
        ftyp.add_compatible_brand(FourCC::new(b"heic"));
        ftyp.add_compatible_brand(FourCC::new(b"mif1"));
        ftyp.add_compatible_brand(FourCC::new(b"mif1"));
        assert_eq!(ftyp.compatible_brands().len(), 2);

        let mut w = BitStream::new();
        ftyp.write_box(&mut w).unwrap();
        assert_eq!(w.size(), 8 + 4 + 4 + 8);
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = FileTypeBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.major_brand(), b"heic");
        assert_eq!(parsed.compatible_brands(), ftyp.compatible_brands());
    }
}
