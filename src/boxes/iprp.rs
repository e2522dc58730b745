//! Item properties: `iprp` containing `ipco` and `ipma`.
//! See ISO 23008-12:2017 § 9.3

use crate::bitstream::BitStream;
use crate::boxes::codecbox::{AvcConfigurationBox, HevcConfigurationBox, VvcConfigurationBox};
use crate::boxes::properties::{
    AuxiliaryTypeProperty, CleanApertureBox, ColourInformationBox, ImageMirror, ImageRotation,
    ImageSpatialExtentsProperty, LayerSelectorProperty, PixelAspectRatioBox,
    PixelInformationProperty, RelativeLocationProperty, TargetOlsProperty,
};
use crate::boxes::{BoxHeader, FullBoxHeader, RawBox};
use crate::fourcc::FourCC;
use crate::{Error, Result};

/// Any box that can sit inside `ipco`.
#[derive(Debug, Clone)]
pub enum ItemProperty {
    Ispe(ImageSpatialExtentsProperty),
    Pasp(PixelAspectRatioBox),
    Pixi(PixelInformationProperty),
    Colr(ColourInformationBox),
    Irot(ImageRotation),
    Imir(ImageMirror),
    Clap(CleanApertureBox),
    Rloc(RelativeLocationProperty),
    AuxC(AuxiliaryTypeProperty),
    Lsel(LayerSelectorProperty),
    Tols(TargetOlsProperty),
    HevcConfig(HevcConfigurationBox),
    AvcConfig(AvcConfigurationBox),
    VvcConfig(VvcConfigurationBox),
    /// Unknown property preserved byte for byte.
    Raw(RawBox),
}

impl ItemProperty {
    pub fn box_type(&self) -> FourCC {
        match self {
            Self::Ispe(_) => FourCC::new(b"ispe"),
            Self::Pasp(_) => FourCC::new(b"pasp"),
            Self::Pixi(_) => FourCC::new(b"pixi"),
            Self::Colr(_) => FourCC::new(b"colr"),
            Self::Irot(_) => FourCC::new(b"irot"),
            Self::Imir(_) => FourCC::new(b"imir"),
            Self::Clap(_) => FourCC::new(b"clap"),
            Self::Rloc(_) => FourCC::new(b"rloc"),
            Self::AuxC(_) => FourCC::new(b"auxC"),
            Self::Lsel(_) => FourCC::new(b"lsel"),
            Self::Tols(_) => FourCC::new(b"tols"),
            Self::HevcConfig(_) => FourCC::new(b"hvcC"),
            Self::AvcConfig(_) => FourCC::new(b"avcC"),
            Self::VvcConfig(_) => FourCC::new(b"vvcC"),
            Self::Raw(raw) => raw.box_type(),
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        match self {
            Self::Ispe(b) => b.write_box(w),
            Self::Pasp(b) => b.write_box(w),
            Self::Pixi(b) => b.write_box(w),
            Self::Colr(b) => b.write_box(w),
            Self::Irot(b) => b.write_box(w),
            Self::Imir(b) => b.write_box(w),
            Self::Clap(b) => b.write_box(w),
            Self::Rloc(b) => b.write_box(w),
            Self::AuxC(b) => b.write_box(w),
            Self::Lsel(b) => b.write_box(w),
            Self::Tols(b) => b.write_box(w),
            Self::HevcConfig(b) => b.write_box(w),
            Self::AvcConfig(b) => b.write_box(w),
            Self::VvcConfig(b) => b.write_box(w),
            Self::Raw(b) => b.write_box(w),
        }
    }

    pub fn parse_box(r: &mut BitStream, tag: FourCC) -> Result<Self> {
        Ok(match &tag.to_bytes() {
            b"ispe" => Self::Ispe(ImageSpatialExtentsProperty::parse_box(r)?),
            b"pasp" => Self::Pasp(PixelAspectRatioBox::parse_box(r)?),
            b"pixi" => Self::Pixi(PixelInformationProperty::parse_box(r)?),
            b"colr" => Self::Colr(ColourInformationBox::parse_box(r)?),
            b"irot" => Self::Irot(ImageRotation::parse_box(r)?),
            b"imir" => Self::Imir(ImageMirror::parse_box(r)?),
            b"clap" => Self::Clap(CleanApertureBox::parse_box(r)?),
            b"rloc" => Self::Rloc(RelativeLocationProperty::parse_box(r)?),
            b"auxC" => Self::AuxC(AuxiliaryTypeProperty::parse_box(r)?),
            b"lsel" => Self::Lsel(LayerSelectorProperty::parse_box(r)?),
            b"tols" => Self::Tols(TargetOlsProperty::parse_box(r)?),
            b"hvcC" => Self::HevcConfig(HevcConfigurationBox::parse_box(r)?),
            b"avcC" => Self::AvcConfig(AvcConfigurationBox::parse_box(r)?),
            b"vvcC" => Self::VvcConfig(VvcConfigurationBox::parse_box(r)?),
            _ => Self::Raw(RawBox::parse_box(r)?),
        })
    }
}

/// One property-to-item association.
#[derive(Debug, Clone, Copy)]
pub struct PropertyAssociation {
    /// 1-based index into the `ipco` child list.
    pub property_index: u16,
    pub essential: bool,
}

#[derive(Debug, Clone)]
struct AssociationEntry {
    item_id: u32,
    associations: Vec<PropertyAssociation>,
}

/// `ipma`. One entry per item; property-index width grows to 15 bits when the
/// container holds more than 127 properties, and the item-ID width to 32 bits
/// when any associated item ID does not fit in 16.
#[derive(Debug, Clone, Default)]
pub struct ItemPropertyAssociation {
    entries: Vec<AssociationEntry>,
}

impl ItemPropertyAssociation {
    pub fn add_entry(&mut self, item_id: u32, property_index: u16, essential: bool) {
        let association = PropertyAssociation {
            property_index,
            essential,
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.item_id == item_id) {
            entry.associations.push(association);
        } else {
            self.entries.push(AssociationEntry {
                item_id,
                associations: vec![association],
            });
        }
    }

    pub fn associations_for(&self, item_id: u32) -> &[PropertyAssociation] {
        self.entries
            .iter()
            .find(|e| e.item_id == item_id)
            .map(|e| e.associations.as_slice())
            .unwrap_or(&[])
    }

    fn write_box(&self, w: &mut BitStream, wide_indexes: bool) -> Result<()> {
        let version = if self.entries.iter().any(|e| e.item_id > u32::from(u16::MAX)) {
            1
        } else {
            0
        };
        let flags = u32::from(wide_indexes);
        let marker = FullBoxHeader::new(b"ipma", version, flags).start_box(w);
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            if version == 0 {
                w.write_u16(entry.item_id as u16);
            } else {
                w.write_u32(entry.item_id);
            }
            w.write_u8(entry.associations.len() as u8);
            for association in &entry.associations {
                w.write_bits(u64::from(association.essential), 1);
                if wide_indexes {
                    w.write_bits(u64::from(association.property_index), 15);
                } else {
                    w.write_bits(u64::from(association.property_index), 7);
                }
            }
        }
        marker.update_size(w)
    }

    fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"ipma", 0, 0);
        full_box.parse(r)?;
        let wide_indexes = full_box.flags() & 1 != 0;
        let entry_count = r.read_u32()?;
        let mut ipma = Self::default();
        for _ in 0..entry_count {
            let item_id = if full_box.version() == 0 {
                u32::from(r.read_u16()?)
            } else {
                r.read_u32()?
            };
            let association_count = r.read_u8()?;
            for _ in 0..association_count {
                let essential = r.read_bits(1)? != 0;
                let property_index = if wide_indexes {
                    r.read_bits(15)? as u16
                } else {
                    r.read_bits(7)? as u16
                };
                ipma.add_entry(item_id, property_index, essential);
            }
        }
        Ok(ipma)
    }
}

/// `iprp`: the property container plus one association box.
#[derive(Debug, Clone, Default)]
pub struct ItemPropertiesBox {
    properties: Vec<ItemProperty>,
    associations: ItemPropertyAssociation,
}

impl ItemPropertiesBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property and associate it with each given item.
    /// Returns the 1-based property index.
    pub fn add_property(
        &mut self,
        property: ItemProperty,
        item_ids: &[u32],
        essential: bool,
    ) -> u16 {
        self.properties.push(property);
        let index = self.properties.len() as u16;
        self.associate_property(index, item_ids, essential);
        index
    }

    /// Associate an already-added property with more items.
    pub fn associate_property(&mut self, index: u16, item_ids: &[u32], essential: bool) {
        for &item_id in item_ids {
            self.associations.add_entry(item_id, index, essential);
        }
    }

    pub fn properties(&self) -> &[ItemProperty] {
        &self.properties
    }

    pub fn property_by_index(&self, index: u16) -> Option<&ItemProperty> {
        index.checked_sub(1).and_then(|i| self.properties.get(usize::from(i)))
    }

    pub fn associations_for(&self, item_id: u32) -> &[PropertyAssociation] {
        self.associations.associations_for(item_id)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Every association must point at an existing `ipco` entry.
    pub fn verify_associations(&self) -> Result<()> {
        let count = self.properties.len() as u16;
        for entry in &self.associations.entries {
            for association in &entry.associations {
                if association.property_index == 0 || association.property_index > count {
                    return Err(Error::Inconsistent(
                        "property association index out of range",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"iprp").start_box(w);
        let ipco_marker = BoxHeader::new(b"ipco").start_box(w);
        for property in &self.properties {
            property.write_box(w)?;
        }
        ipco_marker.update_size(w)?;
        let wide_indexes = self.properties.len() > 127;
        self.associations.write_box(w, wide_indexes)?;
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"iprp");
        header.parse(r)?;
        let mut iprp = Self::new();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"ipco" => {
                    let mut ipco_header = BoxHeader::new(b"ipco");
                    ipco_header.parse(&mut sub)?;
                    while sub.num_bytes_left() > 0 {
                        let (mut prop_stream, prop_tag) = sub.read_sub_box_stream()?;
                        iprp.properties
                            .push(ItemProperty::parse_box(&mut prop_stream, prop_tag)?);
                    }
                }
                b"ipma" => {
                    iprp.associations = ItemPropertyAssociation::parse_box(&mut sub)?;
                }
                _ => return Err(Error::parse(r.position(), "unexpected iprp child")),
            }
        }
        Ok(iprp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn association_indexes_are_one_based_and_shared() {
        let mut iprp = ItemPropertiesBox::new();
        let ispe = ItemProperty::Ispe(ImageSpatialExtentsProperty::new(64, 64));
        let index = iprp.add_property(ispe, &[1, 2], false);
        assert_eq!(index, 1);
        iprp.associate_property(index, &[3], false);
        assert_eq!(iprp.associations_for(3)[0].property_index, 1);
        assert!(iprp.property_by_index(1).is_some());
        assert!(iprp.property_by_index(2).is_none());
    }

    #[test]
    fn ipma_essential_bit_survives_round_trip() {
        let mut iprp = ItemPropertiesBox::new();
        iprp.add_property(
            ItemProperty::Irot(ImageRotation::new(90).unwrap()),
            &[1],
            true,
        );
        iprp.add_property(
            ItemProperty::Ispe(ImageSpatialExtentsProperty::new(8, 8)),
            &[1],
            false,
        );
        let mut w = BitStream::new();
        iprp.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = ItemPropertiesBox::parse_box(&mut sub).unwrap();
        let assocs = parsed.associations_for(1);
        assert_eq!(assocs.len(), 2);
        assert!(assocs[0].essential);
        assert!(!assocs[1].essential);
        assert_eq!(parsed.properties().len(), 2);
    }

    #[test]
    fn more_than_127_properties_widen_the_index_field() {
        let mut iprp = ItemPropertiesBox::new();
        for i in 0..130u32 {
            iprp.add_property(
                ItemProperty::Ispe(ImageSpatialExtentsProperty::new(i, i)),
                &[1],
                false,
            );
        }
        let mut w = BitStream::new();
        iprp.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, _) = w.read_sub_box_stream().unwrap();
        let parsed = ItemPropertiesBox::parse_box(&mut sub).unwrap();
        let assocs = parsed.associations_for(1);
        assert_eq!(assocs.len(), 130);
        assert_eq!(assocs[129].property_index, 130);
    }
}
