//! Derived image writers: identity transforms, grids, overlays and
//! pre-derived references.
//!
//! Derived items carry no coded data. Identity-transform items (`iden`) get
//! a zero-length extent; grid and overlay items store their descriptor in
//! `idat` and address it with the idat construction method.

use crate::boxes::grid::{ImageGrid, ImageOverlay, OverlayOffset};
use crate::boxes::iinf::ItemInfoEntry;
use crate::boxes::iloc::{ConstructionMethod, ItemLocation};
use crate::boxes::iprp::ItemProperty;
use crate::boxes::meta::MetaBox;
use crate::boxes::properties::{
    CleanApertureBox, Fraction, ImageMirror, ImageRotation, ImageSpatialExtentsProperty,
    RelativeLocationProperty,
};
use crate::bitstream::BitStream;
use crate::config::{Clap, Grid, Imir, IndexList, Iovl, Irot, PreDerived, Rloc};
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::media::MediaStore;
use crate::writers::{resolve_reference_items, Layout, MetaWriter};
use crate::Result;

/// The transformative property an `iden` item applies to its base.
pub(crate) enum IdentityKind {
    Rotation(u32),
    Mirror(bool),
    Location { horizontal: u32, vertical: u32 },
    Aperture(Box<Clap>),
}

impl IdentityKind {
    fn property(&self) -> Result<ItemProperty> {
        Ok(match self {
            Self::Rotation(angle) => ItemProperty::Irot(ImageRotation::new(*angle)?),
            Self::Mirror(horizontal_axis) => {
                ItemProperty::Imir(ImageMirror::new(*horizontal_axis))
            }
            Self::Location {
                horizontal,
                vertical,
            } => ItemProperty::Rloc(RelativeLocationProperty::new(*horizontal, *vertical)),
            Self::Aperture(clap) => {
                let f = |n, d| Fraction {
                    numerator: n,
                    denominator: d,
                };
                ItemProperty::Clap(CleanApertureBox::new(
                    f(clap.clap_width_n, clap.clap_width_d),
                    f(clap.clap_height_n, clap.clap_height_d),
                    f(clap.horiz_off_n, clap.horiz_off_d),
                    f(clap.vert_off_n, clap.vert_off_d),
                ))
            }
        })
    }
}

/// One `iden` item per cited base image.
pub(crate) struct IdentityDerivedWriter {
    context_id: ContextId,
    kind: IdentityKind,
    refs_list: Vec<u32>,
    idxs_list: IndexList,
    item_ids: Vec<u32>,
}

impl IdentityDerivedWriter {
    pub fn from_irot(context_id: ContextId, cfg: &Irot) -> Self {
        Self::new(context_id, IdentityKind::Rotation(cfg.angle), &cfg.refs_list, &cfg.idxs_list)
    }

    pub fn from_imir(context_id: ContextId, cfg: &Imir) -> Self {
        Self::new(
            context_id,
            IdentityKind::Mirror(cfg.horizontal_axis),
            &cfg.refs_list,
            &cfg.idxs_list,
        )
    }

    pub fn from_rloc(context_id: ContextId, cfg: &Rloc) -> Self {
        Self::new(
            context_id,
            IdentityKind::Location {
                horizontal: cfg.horizontal_offset,
                vertical: cfg.vertical_offset,
            },
            &cfg.refs_list,
            &cfg.idxs_list,
        )
    }

    pub fn from_clap(context_id: ContextId, cfg: &Clap) -> Self {
        Self::new(
            context_id,
            IdentityKind::Aperture(Box::new(cfg.clone())),
            &cfg.refs_list,
            &cfg.idxs_list,
        )
    }

    fn new(
        context_id: ContextId,
        kind: IdentityKind,
        refs_list: &[u32],
        idxs_list: &IndexList,
    ) -> Self {
        Self {
            context_id,
            kind,
            refs_list: refs_list.to_vec(),
            idxs_list: idxs_list.clone(),
            item_ids: Vec::new(),
        }
    }
}

impl MetaWriter for IdentityDerivedWriter {
    fn prepare(&mut self, services: &mut Services, _media: &mut MediaStore) -> Result<()> {
        let citations: usize = self.idxs_list.iter().map(Vec::len).sum();
        for _ in 0..citations {
            self.item_ids.push(services.allocate_item_id());
        }
        let store = services.store_mut(self.context_id)?;
        for &item_id in &self.item_ids {
            store.set(keys::ITEM_ID, item_id.to_string());
        }
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, _layout: &Layout, services: &Services) -> Result<()> {
        let base_items = resolve_reference_items(services, &self.refs_list, &self.idxs_list)?;
        for (&item_id, &base_item) in self.item_ids.iter().zip(&base_items) {
            meta.add_item(ItemInfoEntry::new(item_id, FourCC::new(b"iden")));
            let mut location = ItemLocation::new(item_id, ConstructionMethod::FileOffset);
            location.add_extent(0, 0);
            meta.add_location(location);
            meta.add_references(FourCC::new(b"dimg"), item_id, &[base_item]);
        }
        meta.add_property(self.kind.property()?, &self.item_ids, true);
        Ok(())
    }
}

/// One `grid` item whose cells are the cited images in scan order.
pub(crate) struct GridImageWriter {
    context_id: ContextId,
    cfg: Grid,
    item_id: u32,
}

impl GridImageWriter {
    pub fn new(context_id: ContextId, cfg: &Grid) -> Self {
        Self {
            context_id,
            cfg: cfg.clone(),
            item_id: 0,
        }
    }
}

impl MetaWriter for GridImageWriter {
    fn prepare(&mut self, services: &mut Services, _media: &mut MediaStore) -> Result<()> {
        self.item_id = services.allocate_item_id();
        services
            .store_mut(self.context_id)?
            .set(keys::ITEM_ID, self.item_id.to_string());
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, _layout: &Layout, services: &Services) -> Result<()> {
        let descriptor = ImageGrid {
            rows_minus_one: (self.cfg.rows - 1) as u8,
            columns_minus_one: (self.cfg.columns - 1) as u8,
            output_width: self.cfg.output_width,
            output_height: self.cfg.output_height,
        };
        let mut payload = BitStream::new();
        descriptor.write(&mut payload);
        let offset = meta.add_item_data(payload.storage());

        meta.add_item(ItemInfoEntry::new(self.item_id, FourCC::new(b"grid")));
        let mut location = ItemLocation::new(self.item_id, ConstructionMethod::IdatOffset);
        location.add_extent(offset, payload.size());
        meta.add_location(location);

        let cells = resolve_reference_items(services, &self.cfg.refs_list, &self.cfg.idxs_list)?;
        meta.add_references(FourCC::new(b"dimg"), self.item_id, &cells);

        let ispe = ItemProperty::Ispe(ImageSpatialExtentsProperty::new(
            self.cfg.output_width,
            self.cfg.output_height,
        ));
        meta.add_property(ispe, &[self.item_id], false);
        Ok(())
    }
}

/// One `iovl` item compositing the cited images onto a canvas.
pub(crate) struct OverlayImageWriter {
    context_id: ContextId,
    cfg: Iovl,
    item_id: u32,
}

impl OverlayImageWriter {
    pub fn new(context_id: ContextId, cfg: &Iovl) -> Self {
        Self {
            context_id,
            cfg: cfg.clone(),
            item_id: 0,
        }
    }
}

impl MetaWriter for OverlayImageWriter {
    fn prepare(&mut self, services: &mut Services, _media: &mut MediaStore) -> Result<()> {
        self.item_id = services.allocate_item_id();
        services
            .store_mut(self.context_id)?
            .set(keys::ITEM_ID, self.item_id.to_string());
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, _layout: &Layout, services: &Services) -> Result<()> {
        let mut canvas_fill_value = [0u16; 4];
        for (slot, &value) in canvas_fill_value
            .iter_mut()
            .zip(self.cfg.canvas_fill_value.iter())
        {
            *slot = value;
        }
        let descriptor = ImageOverlay {
            canvas_fill_value,
            output_width: self.cfg.output_width,
            output_height: self.cfg.output_height,
            offsets: self
                .cfg
                .offsets
                .iter()
                .map(|o| OverlayOffset {
                    horizontal: o.horizontal,
                    vertical: o.vertical,
                })
                .collect(),
        };
        let mut payload = BitStream::new();
        descriptor.write(&mut payload);
        let offset = meta.add_item_data(payload.storage());

        meta.add_item(ItemInfoEntry::new(self.item_id, FourCC::new(b"iovl")));
        let mut location = ItemLocation::new(self.item_id, ConstructionMethod::IdatOffset);
        location.add_extent(offset, payload.size());
        meta.add_location(location);

        let layers = resolve_reference_items(services, &self.cfg.refs_list, &self.cfg.idxs_list)?;
        meta.add_references(FourCC::new(b"dimg"), self.item_id, &layers);

        let ispe = ItemProperty::Ispe(ImageSpatialExtentsProperty::new(
            self.cfg.output_width,
            self.cfg.output_height,
        ));
        meta.add_property(ispe, &[self.item_id], false);
        Ok(())
    }
}

/// Marks already-written coded images as pre-derived from base images.
/// No new item is created.
pub(crate) struct PreDerivedWriter {
    cfg: PreDerived,
}

impl PreDerivedWriter {
    pub fn new(cfg: &PreDerived) -> Self {
        Self { cfg: cfg.clone() }
    }
}

impl MetaWriter for PreDerivedWriter {
    fn prepare(&mut self, _services: &mut Services, _media: &mut MediaStore) -> Result<()> {
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, _layout: &Layout, services: &Services) -> Result<()> {
        let pre_items =
            resolve_reference_items(services, &self.cfg.pre_refs_list, &self.cfg.pre_idxs_list)?;
        let base_items =
            resolve_reference_items(services, &self.cfg.base_refs_list, &self.cfg.base_idxs_list)?;
        for &pre_item in &pre_items {
            meta.add_references(FourCC::new(b"base"), pre_item, &base_items);
        }
        Ok(())
    }
}
