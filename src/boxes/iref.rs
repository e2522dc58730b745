//! Item reference box. See ISO 14496-12:2015 § 8.11.12

use crate::bitstream::BitStream;
use crate::boxes::{BoxHeader, FullBoxHeader};
use crate::fourcc::FourCC;
use crate::{Error, Result};

/// One reference edge set: `from_item_id` → each of `to_item_ids`, where the
/// box type itself names the relationship (`thmb`, `auxl`, `dimg`, `cdsc`,
/// `base`, ...).
#[derive(Debug, Clone)]
pub struct SingleItemTypeReferenceBox {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_ids: Vec<u32>,
}

impl SingleItemTypeReferenceBox {
    fn write_box(&self, w: &mut BitStream, large_ids: bool) -> Result<()> {
        let marker = BoxHeader::new(&self.reference_type.to_bytes()).start_box(w);
        if large_ids {
            w.write_u32(self.from_item_id);
        } else {
            w.write_u16(self.from_item_id as u16);
        }
        w.write_u16(self.to_item_ids.len() as u16);
        for &to_id in &self.to_item_ids {
            if large_ids {
                w.write_u32(to_id);
            } else {
                w.write_u16(to_id as u16);
            }
        }
        marker.update_size(w)
    }

    fn parse_box(r: &mut BitStream, large_ids: bool) -> Result<Self> {
        let mut header = BoxHeader::new(b"    ");
        header.parse(r)?;
        let from_item_id = if large_ids {
            r.read_u32()?
        } else {
            u32::from(r.read_u16()?)
        };
        let reference_count = r.read_u16()?;
        let mut to_item_ids = Vec::with_capacity(usize::from(reference_count));
        for _ in 0..reference_count {
            to_item_ids.push(if large_ids {
                r.read_u32()?
            } else {
                u32::from(r.read_u16()?)
            });
        }
        Ok(Self {
            reference_type: header.box_type(),
            from_item_id,
            to_item_ids,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemReferenceBox {
    references: Vec<SingleItemTypeReferenceBox>,
}

impl ItemReferenceBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append edges from one item. Edges of the same type from the same item
    /// merge into one child box, preserving order.
    pub fn add_references(&mut self, reference_type: FourCC, from_item_id: u32, to_item_ids: &[u32]) {
        if let Some(existing) = self
            .references
            .iter_mut()
            .find(|r| r.reference_type == reference_type && r.from_item_id == from_item_id)
        {
            existing.to_item_ids.extend_from_slice(to_item_ids);
            return;
        }
        self.references.push(SingleItemTypeReferenceBox {
            reference_type,
            from_item_id,
            to_item_ids: to_item_ids.to_vec(),
        });
    }

    pub fn references(&self) -> &[SingleItemTypeReferenceBox] {
        &self.references
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    fn needs_large_ids(&self) -> bool {
        self.references.iter().any(|r| {
            r.from_item_id > u32::from(u16::MAX)
                || r.to_item_ids.iter().any(|&id| id > u32::from(u16::MAX))
        })
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let large_ids = self.needs_large_ids();
        let version = u8::from(large_ids);
        let marker = FullBoxHeader::new(b"iref", version, 0).start_box(w);
        for reference in &self.references {
            reference.write_box(w, large_ids)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"iref", 0, 0);
        full_box.parse(r)?;
        if full_box.version() > 1 {
            return Err(Error::parse(r.position(), "unsupported version in 'iref' box"));
        }
        let large_ids = full_box.version() == 1;
        let mut iref = Self::new();
        while r.num_bytes_left() > 0 {
            let (mut sub, _) = r.read_sub_box_stream()?;
            iref.references
                .push(SingleItemTypeReferenceBox::parse_box(&mut sub, large_ids)?);
        }
        Ok(iref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_edge_set_merges() {
        let mut iref = ItemReferenceBox::new();
        iref.add_references(FourCC::new(b"dimg"), 5, &[1, 2]);
        iref.add_references(FourCC::new(b"dimg"), 5, &[3, 4]);
        iref.add_references(FourCC::new(b"thmb"), 6, &[1]);
        assert_eq!(iref.references().len(), 2);
        assert_eq!(iref.references()[0].to_item_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn wide_ids_switch_to_version_one() {
        let mut iref = ItemReferenceBox::new();
        iref.add_references(FourCC::new(b"cdsc"), 0x2_0000, &[1]);
        let mut w = BitStream::new();
        iref.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = ItemReferenceBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.references()[0].from_item_id, 0x2_0000);
        assert_eq!(parsed.references()[0].to_item_ids, vec![1]);
    }
}
