//! OMAF (ISO 23090-2) metadata boxes: content coverage and region-wise
//! packing. These are carried for completeness when recomposing streams;
//! the image write path never emits them.

use crate::bitstream::BitStream;
use crate::boxes::FullBoxHeader;
use crate::{Error, Result};

/// A sphere region as used by `covi`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SphereRegion {
    pub centre_azimuth: i32,
    pub centre_elevation: i32,
    pub centre_tilt: i32,
    pub azimuth_range: u32,
    pub elevation_range: u32,
    pub interpolate: bool,
}

impl SphereRegion {
    fn write(&self, w: &mut BitStream, with_range: bool) {
        w.write_u32(self.centre_azimuth as u32);
        w.write_u32(self.centre_elevation as u32);
        w.write_u32(self.centre_tilt as u32);
        if with_range {
            w.write_u32(self.azimuth_range);
            w.write_u32(self.elevation_range);
        }
        w.write_u8(if self.interpolate { 0b1000_0000 } else { 0 });
    }

    fn parse(r: &mut BitStream, with_range: bool) -> Result<Self> {
        let mut region = Self {
            centre_azimuth: r.read_u32()? as i32,
            centre_elevation: r.read_u32()? as i32,
            centre_tilt: r.read_u32()? as i32,
            ..Self::default()
        };
        if with_range {
            region.azimuth_range = r.read_u32()?;
            region.elevation_range = r.read_u32()?;
        }
        region.interpolate = r.read_u8()? >> 7 != 0;
        Ok(region)
    }
}

/// One covered region plus its view association.
#[derive(Debug, Clone, Copy)]
pub struct CoverageSphereRegion {
    /// 0 left, 1 right, 2 both; only written when the presence flag is set.
    pub view_idc: u8,
    pub region: SphereRegion,
}

/// Content coverage `covi`.
#[derive(Debug, Clone, Default)]
pub struct CoverageInformationBox {
    /// 0 = four great circles, 1 = two azimuth and two elevation circles.
    pub coverage_shape_type: u8,
    pub view_idc_presence: bool,
    pub default_view_idc: u8,
    pub regions: Vec<CoverageSphereRegion>,
}

impl CoverageInformationBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"covi", 0, 0).start_box(w);
        w.write_u8(self.coverage_shape_type);
        w.write_u8(self.regions.len() as u8);
        if self.view_idc_presence {
            w.write_u8(0b1000_0000);
        } else {
            w.write_u8((self.default_view_idc & 0b11) << 5);
        }
        for region in &self.regions {
            if self.view_idc_presence {
                w.write_u8((region.view_idc & 0b11) << 6);
            }
            region.region.write(w, true);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"covi", 0, 0);
        full_box.parse(r)?;
        let coverage_shape_type = r.read_u8()?;
        let num_regions = r.read_u8()?;
        let packed = r.read_u8()?;
        let view_idc_presence = packed >> 7 == 1;
        let default_view_idc = if view_idc_presence {
            0xff
        } else {
            (packed >> 5) & 0b11
        };
        let mut covi = Self {
            coverage_shape_type,
            view_idc_presence,
            default_view_idc,
            regions: Vec::with_capacity(usize::from(num_regions)),
        };
        for _ in 0..num_regions {
            let view_idc = if view_idc_presence {
                (r.read_u8()? >> 6) & 0b11
            } else {
                0xff
            };
            covi.regions.push(CoverageSphereRegion {
                view_idc,
                region: SphereRegion::parse(r, true)?,
            });
        }
        Ok(covi)
    }
}

/// One rectangular region mapping between projected and packed pictures.
#[derive(Debug, Clone, Copy, Default)]
pub struct RectRegionPacking {
    pub proj_reg_width: u32,
    pub proj_reg_height: u32,
    pub proj_reg_top: u32,
    pub proj_reg_left: u32,
    pub transform_type: u8,
    pub packed_reg_width: u16,
    pub packed_reg_height: u16,
    pub packed_reg_top: u16,
    pub packed_reg_left: u16,
    pub guard_band: Option<GuardBand>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GuardBand {
    pub left_width: u8,
    pub right_width: u8,
    pub top_height: u8,
    pub bottom_height: u8,
    pub not_used_for_pred: bool,
    pub gb_types: [u8; 4],
}

/// Region-wise packing `rwpk`; only rectangular packing (type 0) exists.
#[derive(Debug, Clone, Default)]
pub struct RegionWisePackingBox {
    pub constituent_picture_matching: bool,
    pub proj_picture_width: u32,
    pub proj_picture_height: u32,
    pub packed_picture_width: u16,
    pub packed_picture_height: u16,
    pub regions: Vec<RectRegionPacking>,
}

impl RegionWisePackingBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"rwpk", 0, 0).start_box(w);
        w.write_u8(if self.constituent_picture_matching {
            0b1000_0000
        } else {
            0
        });
        w.write_u8(self.regions.len() as u8);
        w.write_u32(self.proj_picture_width);
        w.write_u32(self.proj_picture_height);
        w.write_u16(self.packed_picture_width);
        w.write_u16(self.packed_picture_height);
        for region in &self.regions {
            // bit 4 is the guard-band flag, the low nibble the packing type
            w.write_u8(if region.guard_band.is_some() { 0b0001_0000 } else { 0 });
            w.write_u32(region.proj_reg_width);
            w.write_u32(region.proj_reg_height);
            w.write_u32(region.proj_reg_top);
            w.write_u32(region.proj_reg_left);
            w.write_u8(region.transform_type << 5);
            w.write_u16(region.packed_reg_width);
            w.write_u16(region.packed_reg_height);
            w.write_u16(region.packed_reg_top);
            w.write_u16(region.packed_reg_left);
            if let Some(guard_band) = &region.guard_band {
                w.write_u8(guard_band.left_width);
                w.write_u8(guard_band.right_width);
                w.write_u8(guard_band.top_height);
                w.write_u8(guard_band.bottom_height);
                let mut packed = u16::from(guard_band.not_used_for_pred) << 15;
                packed |= u16::from(guard_band.gb_types[0] & 0b111) << 12;
                packed |= u16::from(guard_band.gb_types[1] & 0b111) << 9;
                packed |= u16::from(guard_band.gb_types[2] & 0b111) << 6;
                packed |= u16::from(guard_band.gb_types[3] & 0b111) << 3;
                w.write_u16(packed);
            }
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"rwpk", 0, 0);
        full_box.parse(r)?;
        let mut rwpk = Self {
            constituent_picture_matching: r.read_u8()? >> 7 != 0,
            ..Self::default()
        };
        let num_regions = r.read_u8()?;
        rwpk.proj_picture_width = r.read_u32()?;
        rwpk.proj_picture_height = r.read_u32()?;
        rwpk.packed_picture_width = r.read_u16()?;
        rwpk.packed_picture_height = r.read_u16()?;
        for _ in 0..num_regions {
            let flags = r.read_u8()?;
            let guard_band_flag = flags & 0b0001_0000 != 0;
            if flags & 0x0f != 0 {
                return Err(Error::parse(
                    r.position(),
                    "only rectangular region-wise packing exists",
                ));
            }
            let mut region = RectRegionPacking {
                proj_reg_width: r.read_u32()?,
                proj_reg_height: r.read_u32()?,
                proj_reg_top: r.read_u32()?,
                proj_reg_left: r.read_u32()?,
                transform_type: r.read_u8()? >> 5,
                packed_reg_width: r.read_u16()?,
                packed_reg_height: r.read_u16()?,
                packed_reg_top: r.read_u16()?,
                packed_reg_left: r.read_u16()?,
                guard_band: None,
            };
            if guard_band_flag {
                let left_width = r.read_u8()?;
                let right_width = r.read_u8()?;
                let top_height = r.read_u8()?;
                let bottom_height = r.read_u8()?;
                let packed = r.read_u16()?;
                region.guard_band = Some(GuardBand {
                    left_width,
                    right_width,
                    top_height,
                    bottom_height,
                    not_used_for_pred: packed >> 15 != 0,
                    gb_types: [
                        ((packed >> 12) & 0b111) as u8,
                        ((packed >> 9) & 0b111) as u8,
                        ((packed >> 6) & 0b111) as u8,
                        ((packed >> 3) & 0b111) as u8,
                    ],
                });
            }
            rwpk.regions.push(region);
        }
        Ok(rwpk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_round_trips_with_view_idc() {
        let covi = CoverageInformationBox {
            coverage_shape_type: 1,
            view_idc_presence: true,
            default_view_idc: 0,
            regions: vec![CoverageSphereRegion {
                view_idc: 2,
                region: SphereRegion {
                    centre_azimuth: -180_0000,
                    centre_elevation: 45_0000,
                    centre_tilt: 0,
                    azimuth_range: 90_0000,
                    elevation_range: 45_0000,
                    interpolate: false,
                },
            }],
        };
        let mut w = BitStream::new();
        covi.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"covi");
        let parsed = CoverageInformationBox::parse_box(&mut sub).unwrap();
        assert!(parsed.view_idc_presence);
        assert_eq!(parsed.regions[0].view_idc, 2);
        assert_eq!(parsed.regions[0].region, covi.regions[0].region);
    }

    #[test]
    fn packing_regions_round_trip_with_guard_bands() {
        let rwpk = RegionWisePackingBox {
            constituent_picture_matching: false,
            proj_picture_width: 7680,
            proj_picture_height: 3840,
            packed_picture_width: 3840,
            packed_picture_height: 1920,
            regions: vec![RectRegionPacking {
                proj_reg_width: 7680,
                proj_reg_height: 3840,
                proj_reg_top: 0,
                proj_reg_left: 0,
                transform_type: 3,
                packed_reg_width: 3840,
                packed_reg_height: 1920,
                packed_reg_top: 0,
                packed_reg_left: 0,
                guard_band: Some(GuardBand {
                    left_width: 4,
                    right_width: 4,
                    top_height: 0,
                    bottom_height: 0,
                    not_used_for_pred: true,
                    gb_types: [1, 1, 0, 0],
                }),
            }],
        };
        let mut w = BitStream::new();
        rwpk.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = RegionWisePackingBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.proj_picture_width, 7680);
        let region = &parsed.regions[0];
        assert_eq!(region.transform_type, 3);
        let guard_band = region.guard_band.unwrap();
        assert!(guard_band.not_used_for_pred);
        assert_eq!(guard_band.gb_types, [1, 1, 0, 0]);
    }
}
