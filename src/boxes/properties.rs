//! Descriptive and transformative item properties, children of `ipco`.
//! See ISO 23008-12:2017 § 6.5

use crate::bitstream::BitStream;
use crate::boxes::{BoxHeader, FullBoxHeader};
use crate::{Error, Result};

/// Image spatial extents `ispe`. See ISO 23008-12:2017 § 6.5.3
#[derive(Debug, Clone)]
pub struct ImageSpatialExtentsProperty {
    full_box: FullBoxHeader,
    pub width: u32,
    pub height: u32,
}

impl ImageSpatialExtentsProperty {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"ispe", 0, 0),
            width,
            height,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        w.write_u32(self.width);
        w.write_u32(self.height);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"ispe", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            full_box,
            width: r.read_u32()?,
            height: r.read_u32()?,
        })
    }
}

/// Pixel aspect ratio `pasp`. See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone)]
pub struct PixelAspectRatioBox {
    header: BoxHeader,
    pub h_spacing: u32,
    pub v_spacing: u32,
}

impl PixelAspectRatioBox {
    pub fn new(h_spacing: u32, v_spacing: u32) -> Self {
        Self {
            header: BoxHeader::new(b"pasp"),
            h_spacing,
            v_spacing,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        w.write_u32(self.h_spacing);
        w.write_u32(self.v_spacing);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"pasp");
        header.parse(r)?;
        Ok(Self {
            header,
            h_spacing: r.read_u32()?,
            v_spacing: r.read_u32()?,
        })
    }
}

/// Pixel information `pixi`: bit depth of each channel.
/// See ISO 23008-12:2017 § 6.5.6
#[derive(Debug, Clone)]
pub struct PixelInformationProperty {
    full_box: FullBoxHeader,
    pub bits_per_channel: Vec<u8>,
}

impl PixelInformationProperty {
    pub fn new(bits_per_channel: Vec<u8>) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"pixi", 0, 0),
            bits_per_channel,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        w.write_u8(self.bits_per_channel.len() as u8);
        w.write_bytes(&self.bits_per_channel);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"pixi", 0, 0);
        full_box.parse(r)?;
        let num_channels = r.read_u8()?;
        let bits_per_channel = r.read_bytes(u64::from(num_channels))?;
        Ok(Self {
            full_box,
            bits_per_channel,
        })
    }
}

/// Colour information `colr`. See ISO 14496-12:2015 § 12.1.5
#[derive(Debug, Clone)]
pub enum ColourInformationBox {
    /// On-screen colours: colour_type 'nclx'.
    Nclx {
        colour_primaries: u16,
        transfer_characteristics: u16,
        matrix_coefficients: u16,
        full_range_flag: bool,
    },
    /// A raw ICC profile, colour_type 'rICC' or 'prof'.
    Icc { colour_type: [u8; 4], profile: Vec<u8> },
}

impl ColourInformationBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"colr").start_box(w);
        match self {
            Self::Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range_flag,
            } => {
                w.write_bytes(b"nclx");
                w.write_u16(*colour_primaries);
                w.write_u16(*transfer_characteristics);
                w.write_u16(*matrix_coefficients);
                w.write_bits(u64::from(*full_range_flag), 1);
                w.write_bits(0, 7); // reserved
            }
            Self::Icc {
                colour_type,
                profile,
            } => {
                w.write_bytes(colour_type);
                w.write_bytes(profile);
            }
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"colr");
        header.parse(r)?;
        let colour_type: [u8; 4] = r.read_bytes(4)?.try_into().expect("length checked");
        if &colour_type == b"nclx" {
            let colour_primaries = r.read_u16()?;
            let transfer_characteristics = r.read_u16()?;
            let matrix_coefficients = r.read_u16()?;
            let full_range_flag = r.read_bits(1)? != 0;
            r.read_bits(7)?; // reserved
            Ok(Self::Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range_flag,
            })
        } else {
            let profile = r.read_bytes(r.num_bytes_left())?;
            Ok(Self::Icc {
                colour_type,
                profile,
            })
        }
    }
}

/// Image rotation `irot`: anti-clockwise multiples of 90 degrees.
/// See ISO 23008-12:2017 § 6.5.10
#[derive(Debug, Clone)]
pub struct ImageRotation {
    header: BoxHeader,
    angle: u32,
}

impl ImageRotation {
    pub fn new(angle: u32) -> Result<Self> {
        if angle % 90 != 0 || angle > 270 {
            return Err(Error::ConfigInvalid(format!(
                "irot angle {angle} not in {{0, 90, 180, 270}}"
            )));
        }
        Ok(Self {
            header: BoxHeader::new(b"irot"),
            angle,
        })
    }

    pub fn angle(&self) -> u32 {
        self.angle
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        w.write_bits(0, 6); // reserved
        w.write_bits(u64::from(self.angle / 90), 2);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"irot");
        header.parse(r)?;
        r.read_bits(6)?; // reserved
        let angle = r.read_bits(2)? * 90;
        Ok(Self { header, angle })
    }
}

/// Image mirror `imir`. Axis 0 mirrors over a vertical axis, 1 horizontal.
/// See ISO 23008-12:2017 § 6.5.12
#[derive(Debug, Clone)]
pub struct ImageMirror {
    header: BoxHeader,
    pub horizontal_axis: bool,
}

impl ImageMirror {
    pub fn new(horizontal_axis: bool) -> Self {
        Self {
            header: BoxHeader::new(b"imir"),
            horizontal_axis,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        w.write_bits(0, 7); // reserved
        w.write_bits(u64::from(self.horizontal_axis), 1);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"imir");
        header.parse(r)?;
        r.read_bits(7)?; // reserved
        let horizontal_axis = r.read_bits(1)? != 0;
        Ok(Self {
            header,
            horizontal_axis,
        })
    }
}

/// A rational number as a numerator/denominator pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

/// Clean aperture `clap`. See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone)]
pub struct CleanApertureBox {
    header: BoxHeader,
    pub width: Fraction,
    pub height: Fraction,
    pub horiz_offset: Fraction,
    pub vert_offset: Fraction,
}

impl CleanApertureBox {
    pub fn new(
        width: Fraction,
        height: Fraction,
        horiz_offset: Fraction,
        vert_offset: Fraction,
    ) -> Self {
        Self {
            header: BoxHeader::new(b"clap"),
            width,
            height,
            horiz_offset,
            vert_offset,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        for fraction in [
            &self.width,
            &self.height,
            &self.horiz_offset,
            &self.vert_offset,
        ] {
            w.write_u32(fraction.numerator);
            w.write_u32(fraction.denominator);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"clap");
        header.parse(r)?;
        let mut fractions = [Fraction {
            numerator: 0,
            denominator: 0,
        }; 4];
        for fraction in fractions.iter_mut() {
            fraction.numerator = r.read_u32()?;
            fraction.denominator = r.read_u32()?;
        }
        Ok(Self {
            header,
            width: fractions[0],
            height: fractions[1],
            horiz_offset: fractions[2],
            vert_offset: fractions[3],
        })
    }
}

/// Relative location `rloc`. See ISO 23008-12:2017 § 6.5.7
#[derive(Debug, Clone)]
pub struct RelativeLocationProperty {
    full_box: FullBoxHeader,
    pub horizontal_offset: u32,
    pub vertical_offset: u32,
}

impl RelativeLocationProperty {
    pub fn new(horizontal_offset: u32, vertical_offset: u32) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"rloc", 0, 0),
            horizontal_offset,
            vertical_offset,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        w.write_u32(self.horizontal_offset);
        w.write_u32(self.vertical_offset);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"rloc", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            full_box,
            horizontal_offset: r.read_u32()?,
            vertical_offset: r.read_u32()?,
        })
    }
}

/// Auxiliary type `auxC`: a URN plus codec-specific subtype bytes.
/// See ISO 23008-12:2017 § 6.5.8
#[derive(Debug, Clone)]
pub struct AuxiliaryTypeProperty {
    full_box: FullBoxHeader,
    pub aux_type: String,
    pub aux_subtype: Vec<u8>,
}

impl AuxiliaryTypeProperty {
    pub fn new(aux_type: String, aux_subtype: Vec<u8>) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"auxC", 0, 0),
            aux_type,
            aux_subtype,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        w.write_zero_terminated_string(&self.aux_type);
        w.write_bytes(&self.aux_subtype);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"auxC", 0, 0);
        full_box.parse(r)?;
        let aux_type = r.read_zero_terminated_string()?;
        let aux_subtype = r.read_bytes(r.num_bytes_left())?;
        Ok(Self {
            full_box,
            aux_type,
            aux_subtype,
        })
    }
}

/// Layer selector `lsel` for multi-layer codecs.
/// See ISO 23008-12:2017 § 6.5.11
#[derive(Debug, Clone)]
pub struct LayerSelectorProperty {
    header: BoxHeader,
    pub layer_id: u16,
}

impl LayerSelectorProperty {
    pub fn new(layer_id: u16) -> Self {
        Self {
            header: BoxHeader::new(b"lsel"),
            layer_id,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.header.start_box(w);
        w.write_u16(self.layer_id);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"lsel");
        header.parse(r)?;
        Ok(Self {
            header,
            layer_id: r.read_u16()?,
        })
    }
}

/// Target output layer set `tols` for layered HEVC items.
/// See ISO 23008-12:2017 § 6.5.13
#[derive(Debug, Clone)]
pub struct TargetOlsProperty {
    full_box: FullBoxHeader,
    pub target_ols_index: u16,
}

impl TargetOlsProperty {
    pub fn new(target_ols_index: u16) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"tols", 0, 0),
            target_ols_index,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        w.write_u16(self.target_ols_index);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"tols", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            full_box,
            target_ols_index: r.read_u16()?,
        })
    }
}

/// Sphere rotation `rotn`, 16.16 fixed-point yaw/pitch/roll.
#[derive(Debug, Clone, Default)]
pub struct RotationBox {
    pub yaw: i32,
    pub pitch: i32,
    pub roll: i32,
}

impl RotationBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"rotn", 0, 0).start_box(w);
        w.write_u32(self.yaw as u32);
        w.write_u32(self.pitch as u32);
        w.write_u32(self.roll as u32);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"rotn", 0, 0);
        full_box.parse(r)?;
        Ok(Self {
            yaw: r.read_u32()? as i32,
            pitch: r.read_u32()? as i32,
            roll: r.read_u32()? as i32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irot_validates_angle() {
        assert!(ImageRotation::new(90).is_ok());
        assert!(ImageRotation::new(45).is_err());
        assert!(ImageRotation::new(360).is_err());
    }

    #[test]
    fn irot_packs_angle_in_two_bits() {
        let mut w = BitStream::new();
        ImageRotation::new(270).unwrap().write_box(&mut w).unwrap();
        assert_eq!(w.storage(), &[0, 0, 0, 9, b'i', b'r', b'o', b't', 3]);
    }

    #[test]
    fn auxc_is_zero_terminated() {
        let mut w = BitStream::new();
        AuxiliaryTypeProperty::new("urn:mpeg:hevc:2015:auxid:1".into(), vec![])
            .write_box(&mut w)
            .unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"auxC");
        let parsed = AuxiliaryTypeProperty::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.aux_type, "urn:mpeg:hevc:2015:auxid:1");
        assert!(parsed.aux_subtype.is_empty());
    }

    #[test]
    fn clap_serializes_eight_fields() {
        let f = |n, d| Fraction {
            numerator: n,
            denominator: d,
        };
        let mut w = BitStream::new();
        CleanApertureBox::new(f(1918, 1), f(1078, 1), f(0, 2), f(1, 2))
            .write_box(&mut w)
            .unwrap();
        assert_eq!(w.size(), 8 + 8 * 4);
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = CleanApertureBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.width, f(1918, 1));
        assert_eq!(parsed.vert_offset, f(1, 2));
    }
}
