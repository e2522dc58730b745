//! The `meta` box and its item-level children.
//! See ISO 14496-12:2015 § 8.11

use crate::bitstream::BitStream;
use crate::boxes::iinf::{ItemInfoBox, ItemInfoEntry};
use crate::boxes::iloc::{ItemLocation, ItemLocationBox};
use crate::boxes::iprp::{ItemPropertiesBox, ItemProperty};
use crate::boxes::iref::ItemReferenceBox;
use crate::boxes::{BoxHeader, FullBoxHeader};
use crate::fourcc::FourCC;
use crate::{Error, Result};

/// Handler reference box `hdlr`. See ISO 14496-12:2015 § 8.4.3
#[derive(Debug, Clone)]
pub struct HandlerBox {
    full_box: FullBoxHeader,
    pub handler_type: FourCC,
    pub name: String,
}

impl HandlerBox {
    pub fn new(handler_type: FourCC) -> Self {
        Self {
            full_box: FullBoxHeader::new(b"hdlr", 0, 0),
            handler_type,
            name: String::new(),
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = self.full_box.start_box(w);
        w.write_u32(0); // pre_defined
        w.write_u32(self.handler_type.value());
        for _ in 0..3 {
            w.write_u32(0); // reserved
        }
        w.write_zero_terminated_string(&self.name);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"hdlr", 0, 0);
        full_box.parse(r)?;
        r.read_u32()?; // pre_defined
        let handler_type = FourCC::from(r.read_u32()?);
        for _ in 0..3 {
            r.read_u32()?; // reserved
        }
        let name = if r.num_bytes_left() > 0 {
            r.read_zero_terminated_string()?
        } else {
            String::new()
        };
        Ok(Self {
            full_box,
            handler_type,
            name,
        })
    }
}

/// Primary item box `pitm`. See ISO 14496-12:2015 § 8.11.4
#[derive(Debug, Clone)]
pub struct PrimaryItemBox {
    pub item_id: u32,
}

impl PrimaryItemBox {
    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let version = if self.item_id > u32::from(u16::MAX) { 1 } else { 0 };
        let marker = FullBoxHeader::new(b"pitm", version, 0).start_box(w);
        if version == 0 {
            w.write_u16(self.item_id as u16);
        } else {
            w.write_u32(self.item_id);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"pitm", 0, 0);
        full_box.parse(r)?;
        let item_id = match full_box.version() {
            0 => u32::from(r.read_u16()?),
            1 => r.read_u32()?,
            _ => return Err(Error::parse(r.position(), "unsupported pitm version")),
        };
        Ok(Self { item_id })
    }
}

/// Item data box `idat`: inline item payloads, addressed by `iloc` entries
/// using the idat construction method. See ISO 14496-12:2015 § 8.11.11
#[derive(Debug, Clone, Default)]
pub struct ItemDataBox {
    data: Vec<u8>,
}

impl ItemDataBox {
    /// Append payload bytes; returns their offset within the box payload.
    pub fn add_data(&mut self, data: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(data);
        offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"idat").start_box(w);
        w.write_bytes(&self.data);
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"idat");
        header.parse(r)?;
        Ok(Self {
            data: r.read_bytes(r.num_bytes_left())?,
        })
    }
}

/// One entity grouping, a child of `grpl` whose box type is the group type
/// (e.g. `altr`). See ISO 14496-12:2015 § 8.18.2
#[derive(Debug, Clone)]
pub struct EntityToGroupBox {
    pub group_type: FourCC,
    pub group_id: u32,
    pub entity_ids: Vec<u32>,
}

impl EntityToGroupBox {
    pub fn new(group_type: FourCC, group_id: u32, entity_ids: Vec<u32>) -> Self {
        Self {
            group_type,
            group_id,
            entity_ids,
        }
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(&self.group_type.to_bytes(), 0, 0).start_box(w);
        w.write_u32(self.group_id);
        w.write_u32(self.entity_ids.len() as u32);
        for &id in &self.entity_ids {
            w.write_u32(id);
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"    ", 0, 0);
        full_box.parse(r)?;
        let group_id = r.read_u32()?;
        let num_entities = r.read_u32()?;
        let mut entity_ids = Vec::with_capacity(num_entities as usize);
        for _ in 0..num_entities {
            entity_ids.push(r.read_u32()?);
        }
        Ok(Self {
            group_type: full_box.box_type(),
            group_id,
            entity_ids,
        })
    }
}

/// Groups list box `grpl`.
#[derive(Debug, Clone, Default)]
pub struct GroupsListBox {
    groups: Vec<EntityToGroupBox>,
}

impl GroupsListBox {
    pub fn add_group(&mut self, group: EntityToGroupBox) {
        self.groups.push(group);
    }

    pub fn groups(&self) -> &[EntityToGroupBox] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = BoxHeader::new(b"grpl").start_box(w);
        for group in &self.groups {
            group.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut header = BoxHeader::new(b"grpl");
        header.parse(r)?;
        let mut grpl = Self::default();
        while r.num_bytes_left() > 0 {
            let (mut sub, _) = r.read_sub_box_stream()?;
            grpl.add_group(EntityToGroupBox::parse_box(&mut sub)?);
        }
        Ok(grpl)
    }
}

/// The item-based content container.
#[derive(Debug, Clone, Default)]
pub struct MetaBox {
    handler: Option<HandlerBox>,
    primary_item: Option<PrimaryItemBox>,
    iinf: ItemInfoBox,
    iloc: ItemLocationBox,
    iref: ItemReferenceBox,
    iprp: ItemPropertiesBox,
    idat: ItemDataBox,
    grpl: GroupsListBox,
}

impl MetaBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler type; the first writer to set it wins, later writers
    /// must agree with what a reader will see.
    pub fn set_handler_type(&mut self, handler_type: FourCC) {
        if let Some(handler) = &self.handler {
            if handler.handler_type != handler_type {
                debug!(
                    "meta handler stays '{}', ignoring '{}'",
                    handler.handler_type, handler_type
                );
            }
            return;
        }
        self.handler = Some(HandlerBox::new(handler_type));
    }

    pub fn handler_type(&self) -> Option<FourCC> {
        self.handler.as_ref().map(|h| h.handler_type)
    }

    pub fn set_primary_item(&mut self, item_id: u32) -> Result<()> {
        if self.primary_item.is_some() {
            return Err(Error::Inconsistent("primary item set more than once"));
        }
        self.primary_item = Some(PrimaryItemBox { item_id });
        Ok(())
    }

    pub fn primary_item_id(&self) -> Option<u32> {
        self.primary_item.as_ref().map(|p| p.item_id)
    }

    pub fn add_item(&mut self, entry: ItemInfoEntry) {
        self.iinf.add_entry(entry);
    }

    pub fn items(&self) -> &ItemInfoBox {
        &self.iinf
    }

    pub fn add_location(&mut self, location: ItemLocation) {
        self.iloc.add_item(location);
    }

    pub fn locations(&self) -> &ItemLocationBox {
        &self.iloc
    }

    pub fn add_references(&mut self, reference_type: FourCC, from_item_id: u32, to_item_ids: &[u32]) {
        self.iref.add_references(reference_type, from_item_id, to_item_ids);
    }

    pub fn references(&self) -> &ItemReferenceBox {
        &self.iref
    }

    pub fn add_property(&mut self, property: ItemProperty, item_ids: &[u32], essential: bool) -> u16 {
        self.iprp.add_property(property, item_ids, essential)
    }

    pub fn associate_property(&mut self, index: u16, item_ids: &[u32], essential: bool) {
        self.iprp.associate_property(index, item_ids, essential);
    }

    pub fn properties(&self) -> &ItemPropertiesBox {
        &self.iprp
    }

    /// Stash inline item data; returns its offset inside the idat payload.
    pub fn add_item_data(&mut self, data: &[u8]) -> u64 {
        self.idat.add_data(data)
    }

    pub fn add_entity_group(&mut self, group: EntityToGroupBox) {
        self.grpl.add_group(group);
    }

    pub fn groups(&self) -> &GroupsListBox {
        &self.grpl
    }

    pub fn is_empty(&self) -> bool {
        self.iinf.is_empty() && self.grpl.is_empty()
    }

    pub fn write_box(&self, w: &mut BitStream) -> Result<()> {
        let marker = FullBoxHeader::new(b"meta", 0, 0).start_box(w);
        if let Some(handler) = &self.handler {
            handler.write_box(w)?;
        }
        if let Some(primary_item) = &self.primary_item {
            primary_item.write_box(w)?;
        }
        if !self.iinf.is_empty() {
            self.iinf.write_box(w)?;
        }
        if !self.iloc.is_empty() {
            self.iloc.write_box(w)?;
        }
        if !self.iref.is_empty() {
            self.iref.write_box(w)?;
        }
        if !self.iprp.is_empty() {
            self.iprp.write_box(w)?;
        }
        if !self.idat.is_empty() {
            self.idat.write_box(w)?;
        }
        if !self.grpl.is_empty() {
            self.grpl.write_box(w)?;
        }
        marker.update_size(w)
    }

    pub fn parse_box(r: &mut BitStream) -> Result<Self> {
        let mut full_box = FullBoxHeader::new(b"meta", 0, 0);
        full_box.parse(r)?;
        if full_box.version() != 0 {
            return Err(Error::parse(r.position(), "unsupported meta version"));
        }
        let mut meta = Self::new();
        while r.num_bytes_left() > 0 {
            let (mut sub, tag) = r.read_sub_box_stream()?;
            match &tag.to_bytes() {
                b"hdlr" => meta.handler = Some(HandlerBox::parse_box(&mut sub)?),
                b"pitm" => meta.primary_item = Some(PrimaryItemBox::parse_box(&mut sub)?),
                b"iinf" => meta.iinf = ItemInfoBox::parse_box(&mut sub)?,
                b"iloc" => meta.iloc = ItemLocationBox::parse_box(&mut sub)?,
                b"iref" => meta.iref = ItemReferenceBox::parse_box(&mut sub)?,
                b"iprp" => meta.iprp = ItemPropertiesBox::parse_box(&mut sub)?,
                b"idat" => meta.idat = ItemDataBox::parse_box(&mut sub)?,
                b"grpl" => meta.grpl = GroupsListBox::parse_box(&mut sub)?,
                other => {
                    warn!("skipping unknown meta child '{}'", FourCC::new(other));
                }
            }
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_is_first_writer_wins() {
        let mut meta = MetaBox::new();
        meta.set_handler_type(FourCC::new(b"pict"));
        meta.set_handler_type(FourCC::new(b"auxv"));
        assert_eq!(meta.handler_type(), Some(FourCC::new(b"pict")));
    }

    #[test]
    fn duplicate_primary_item_is_rejected() {
        let mut meta = MetaBox::new();
        meta.set_primary_item(1).unwrap();
        assert!(meta.set_primary_item(2).is_err());
    }

    #[test]
    fn meta_round_trips_items_and_groups() {
        let mut meta = MetaBox::new();
        meta.set_handler_type(FourCC::new(b"pict"));
        meta.set_primary_item(1).unwrap();
        meta.add_item(ItemInfoEntry::new(1, FourCC::new(b"hvc1")));
        let mut location = ItemLocation::new(1, crate::boxes::iloc::ConstructionMethod::FileOffset);
        location.add_extent(100, 50);
        meta.add_location(location);
        meta.add_entity_group(EntityToGroupBox::new(FourCC::new(b"altr"), 100, vec![1, 2]));
        let offset = meta.add_item_data(&[1, 2, 3]);
        assert_eq!(offset, 0);

        let mut w = BitStream::new();
        meta.write_box(&mut w).unwrap();
        w.reset();
        let (mut sub, tag) = w.read_sub_box_stream().unwrap();
        assert_eq!(tag, b"meta");
        let parsed = MetaBox::parse_box(&mut sub).unwrap();
        assert_eq!(parsed.primary_item_id(), Some(1));
        assert_eq!(parsed.items().entries().len(), 1);
        assert_eq!(parsed.groups().groups()[0].entity_ids, vec![1, 2]);
        assert_eq!(parsed.locations().items()[0].extents[0].extent_offset, 100);
        assert_eq!(parsed.idat.data(), &[1, 2, 3]);
    }
}
