//! Derived-image descriptors stored in `idat`: image grid and overlay.
//! See ISO 23008-12:2017 § 6.6.2.3.2 and § 6.6.2.2.2
//!
//! These are not boxes; they are bare records addressed through `iloc` with
//! the idat construction method. Field widths grow from 16 to 32 bits via
//! flag bit 0 when a dimension (or, for overlays, any offset) does not fit.

use crate::bitstream::BitStream;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ImageGrid {
    pub rows_minus_one: u8,
    pub columns_minus_one: u8,
    pub output_width: u32,
    pub output_height: u32,
}

impl ImageGrid {
    fn needs_32bit_fields(&self) -> bool {
        self.output_width > u32::from(u16::MAX) || self.output_height > u32::from(u16::MAX)
    }

    pub fn write(&self, w: &mut BitStream) {
        let wide = self.needs_32bit_fields();
        w.write_u8(0); // version
        w.write_u8(u8::from(wide)); // flags
        w.write_u8(self.rows_minus_one);
        w.write_u8(self.columns_minus_one);
        if wide {
            w.write_u32(self.output_width);
            w.write_u32(self.output_height);
        } else {
            w.write_u16(self.output_width as u16);
            w.write_u16(self.output_height as u16);
        }
    }

    pub fn parse(r: &mut BitStream) -> Result<Self> {
        let version = r.read_u8()?;
        if version != 0 {
            return Err(Error::parse(r.position(), "unsupported grid version"));
        }
        let wide = r.read_u8()? & 1 != 0;
        let rows_minus_one = r.read_u8()?;
        let columns_minus_one = r.read_u8()?;
        let (output_width, output_height) = if wide {
            (r.read_u32()?, r.read_u32()?)
        } else {
            (u32::from(r.read_u16()?), u32::from(r.read_u16()?))
        };
        Ok(Self {
            rows_minus_one,
            columns_minus_one,
            output_width,
            output_height,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayOffset {
    pub horizontal: i32,
    pub vertical: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ImageOverlay {
    /// Canvas fill, one value per channel in RGBA order.
    pub canvas_fill_value: [u16; 4],
    pub output_width: u32,
    pub output_height: u32,
    /// One offset per referenced image, in `dimg` reference order.
    pub offsets: Vec<OverlayOffset>,
}

impl ImageOverlay {
    fn needs_32bit_fields(&self) -> bool {
        self.output_width > u32::from(u16::MAX)
            || self.output_height > u32::from(u16::MAX)
            || self.offsets.iter().any(|o| {
                o.horizontal > i32::from(i16::MAX)
                    || o.horizontal < i32::from(i16::MIN)
                    || o.vertical > i32::from(i16::MAX)
                    || o.vertical < i32::from(i16::MIN)
            })
    }

    pub fn write(&self, w: &mut BitStream) {
        let wide = self.needs_32bit_fields();
        w.write_u8(0); // version
        w.write_u8(u8::from(wide)); // flags
        for &value in &self.canvas_fill_value {
            w.write_u16(value);
        }
        if wide {
            w.write_u32(self.output_width);
            w.write_u32(self.output_height);
        } else {
            w.write_u16(self.output_width as u16);
            w.write_u16(self.output_height as u16);
        }
        for offset in &self.offsets {
            if wide {
                w.write_u32(offset.horizontal as u32);
                w.write_u32(offset.vertical as u32);
            } else {
                w.write_u16(offset.horizontal as u16);
                w.write_u16(offset.vertical as u16);
            }
        }
    }

    pub fn parse(r: &mut BitStream) -> Result<Self> {
        let version = r.read_u8()?;
        if version != 0 {
            return Err(Error::parse(r.position(), "unsupported overlay version"));
        }
        let wide = r.read_u8()? & 1 != 0;
        let mut overlay = Self::default();
        for value in overlay.canvas_fill_value.iter_mut() {
            *value = r.read_u16()?;
        }
        if wide {
            overlay.output_width = r.read_u32()?;
            overlay.output_height = r.read_u32()?;
        } else {
            overlay.output_width = u32::from(r.read_u16()?);
            overlay.output_height = u32::from(r.read_u16()?);
        }
        // One offset pair per dimg reference; read whatever is present.
        while r.num_bytes_left() > 0 {
            let offset = if wide {
                OverlayOffset {
                    horizontal: r.read_u32()? as i32,
                    vertical: r.read_u32()? as i32,
                }
            } else {
                OverlayOffset {
                    horizontal: i32::from(r.read_u16()? as i16),
                    vertical: i32::from(r.read_u16()? as i16),
                }
            };
            overlay.offsets.push(offset);
        }
        Ok(overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_grid_uses_16_bit_fields() {
        let grid = ImageGrid {
            rows_minus_one: 1,
            columns_minus_one: 1,
            output_width: 3840,
            output_height: 2160,
        };
        let mut w = BitStream::new();
        grid.write(&mut w);
        assert_eq!(
            w.storage(),
            &[0x00, 0x00, 0x01, 0x01, 0x0f, 0x00, 0x08, 0x70]
        );
    }

    #[test]
    fn oversized_grid_promotes_to_32_bit_fields() {
        let grid = ImageGrid {
            rows_minus_one: 0,
            columns_minus_one: 3,
            output_width: 70000,
            output_height: 100,
            };
        let mut w = BitStream::new();
        grid.write(&mut w);
        assert_eq!(w.size(), 4 + 8);
        w.reset();
        let parsed = ImageGrid::parse(&mut w).unwrap();
        assert_eq!(parsed.output_width, 70000);
        assert_eq!(parsed.columns_minus_one, 3);
    }

    #[test]
    fn overlay_offsets_force_promotion() {
        let overlay = ImageOverlay {
            canvas_fill_value: [1, 2, 3, 0xffff],
            output_width: 100,
            output_height: 100,
            offsets: vec![OverlayOffset {
                horizontal: -40000,
                vertical: 0,
            }],
        };
        let mut w = BitStream::new();
        overlay.write(&mut w);
        w.reset();
        let parsed = ImageOverlay::parse(&mut w).unwrap();
        assert_eq!(parsed.offsets[0].horizontal, -40000);
        assert_eq!(parsed.canvas_fill_value, [1, 2, 3, 0xffff]);
    }

    #[test]
    fn negative_small_offsets_survive_16_bit_form() {
        let overlay = ImageOverlay {
            canvas_fill_value: [0; 4],
            output_width: 64,
            output_height: 64,
            offsets: vec![OverlayOffset {
                horizontal: -5,
                vertical: -1,
            }],
        };
        let mut w = BitStream::new();
        overlay.write(&mut w);
        w.reset();
        let parsed = ImageOverlay::parse(&mut w).unwrap();
        assert_eq!(
            parsed.offsets[0],
            OverlayOffset {
                horizontal: -5,
                vertical: -1
            }
        );
    }
}
