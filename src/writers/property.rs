//! Property writer: transformative and descriptive properties attached to
//! images that already exist, without deriving new items.

use crate::boxes::iprp::ItemProperty;
use crate::boxes::meta::MetaBox;
use crate::boxes::properties::{
    CleanApertureBox, Fraction, ImageMirror, ImageRotation, RelativeLocationProperty,
};
use crate::config::Property;
use crate::store::Services;
use crate::writers::media::MediaStore;
use crate::writers::{resolve_reference_items, Layout, MetaWriter};
use crate::Result;

pub(crate) struct PropertyWriter {
    cfg: Property,
}

impl PropertyWriter {
    pub fn new(cfg: &Property) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn is_empty(&self) -> bool {
        self.cfg.irots.is_empty()
            && self.cfg.imirs.is_empty()
            && self.cfg.rlocs.is_empty()
            && self.cfg.claps.is_empty()
    }
}

impl MetaWriter for PropertyWriter {
    fn prepare(&mut self, _services: &mut Services, _media: &mut MediaStore) -> Result<()> {
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, _layout: &Layout, services: &Services) -> Result<()> {
        for irot in &self.cfg.irots {
            let items = resolve_reference_items(services, &irot.refs_list, &irot.idxs_list)?;
            let property = ItemProperty::Irot(ImageRotation::new(irot.angle)?);
            meta.add_property(property, &items, irot.essential);
        }
        for imir in &self.cfg.imirs {
            let items = resolve_reference_items(services, &imir.refs_list, &imir.idxs_list)?;
            let property = ItemProperty::Imir(ImageMirror::new(imir.horizontal_axis));
            meta.add_property(property, &items, imir.essential);
        }
        for rloc in &self.cfg.rlocs {
            let items = resolve_reference_items(services, &rloc.refs_list, &rloc.idxs_list)?;
            let property = ItemProperty::Rloc(RelativeLocationProperty::new(
                rloc.horizontal_offset,
                rloc.vertical_offset,
            ));
            meta.add_property(property, &items, rloc.essential);
        }
        for clap in &self.cfg.claps {
            let items = resolve_reference_items(services, &clap.refs_list, &clap.idxs_list)?;
            let f = |n, d| Fraction {
                numerator: n,
                denominator: d,
            };
            let property = ItemProperty::Clap(CleanApertureBox::new(
                f(clap.clap_width_n, clap.clap_width_d),
                f(clap.clap_height_n, clap.clap_height_d),
                f(clap.horiz_off_n, clap.horiz_off_d),
                f(clap.vert_off_n, clap.vert_off_d),
            ));
            meta.add_property(property, &items, clap.essential);
        }
        Ok(())
    }
}
