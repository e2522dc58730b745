//! Auxiliary image writer: alpha planes, depth maps and similar companions.

use std::path::PathBuf;

use crate::boxes::iinf::ItemInfoEntry;
use crate::boxes::iloc::{ConstructionMethod, ItemLocation};
use crate::boxes::iprp::ItemProperty;
use crate::boxes::meta::MetaBox;
use crate::boxes::properties::{AuxiliaryTypeProperty, ImageSpatialExtentsProperty};
use crate::codec::{parse_annexb_file, CodeType, DecoderConfig};
use crate::config::IndexList;
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::master::config_property;
use crate::writers::media::MediaStore;
use crate::writers::{display_dimension, resolve_reference_items, Layout, MdatExtent, MetaWriter};
use crate::{Error, Result};

pub(crate) struct AuxiliaryImageWriter {
    context_id: ContextId,
    code_type: CodeType,
    file_path: PathBuf,
    urn: String,
    disp_xdim: u32,
    disp_ydim: u32,
    refs_list: Vec<u32>,
    idxs_list: IndexList,
    hidden: bool,
    config: Option<DecoderConfig>,
    item_ids: Vec<u32>,
    extents: Vec<MdatExtent>,
}

impl AuxiliaryImageWriter {
    pub fn new(
        context_id: ContextId,
        auxiliary: &crate::config::Auxiliary,
        master_code_type: &str,
    ) -> Result<Self> {
        let code = auxiliary
            .code_type
            .as_deref()
            .unwrap_or(master_code_type);
        Ok(Self {
            context_id,
            code_type: CodeType::from_tag(FourCC::try_from(code)?)?,
            file_path: auxiliary.file_path.clone(),
            urn: auxiliary.urn.clone(),
            disp_xdim: auxiliary.disp_xdim,
            disp_ydim: auxiliary.disp_ydim,
            refs_list: auxiliary.refs_list.clone(),
            idxs_list: auxiliary.idxs_list.clone(),
            hidden: auxiliary.hidden,
            config: None,
            item_ids: Vec::new(),
            extents: Vec::new(),
        })
    }
}

impl MetaWriter for AuxiliaryImageWriter {
    fn prepare(&mut self, services: &mut Services, media: &mut MediaStore) -> Result<()> {
        let parsed = parse_annexb_file(&self.file_path, self.code_type, 0.0)?;
        for sample in &parsed.samples {
            let extent = media.add_sample(self.context_id, sample)?;
            self.extents.push(extent);
            self.item_ids.push(services.allocate_item_id());
        }
        self.disp_xdim = display_dimension(self.disp_xdim, parsed.config.pic_width());
        self.disp_ydim = display_dimension(self.disp_ydim, parsed.config.pic_height());

        let store = services.store_mut(self.context_id)?;
        for &item_id in &self.item_ids {
            store.set(keys::ITEM_ID, item_id.to_string());
        }
        store.set(keys::WIDTH, self.disp_xdim.to_string());
        store.set(keys::HEIGHT, self.disp_ydim.to_string());

        self.config = Some(parsed.config);
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, layout: &Layout, services: &Services) -> Result<()> {
        meta.set_handler_type(FourCC::new(b"pict"));

        for (&item_id, extent) in self.item_ids.iter().zip(&self.extents) {
            let mut entry = ItemInfoEntry::new(item_id, self.code_type.tag());
            entry.set_hidden(self.hidden);
            meta.add_item(entry);
            let mut location = ItemLocation::new(item_id, ConstructionMethod::FileOffset);
            location.add_extent(layout.resolve(extent), extent.length);
            meta.add_location(location);
        }

        let ispe = ItemProperty::Ispe(ImageSpatialExtentsProperty::new(
            self.disp_xdim,
            self.disp_ydim,
        ));
        meta.add_property(ispe, &self.item_ids, false);
        let config = self
            .config
            .as_ref()
            .ok_or(Error::Inconsistent("writer composed before prepare"))?;
        meta.add_property(config_property(config), &self.item_ids, true);

        let auxc = ItemProperty::AuxC(AuxiliaryTypeProperty::new(self.urn.clone(), Vec::new()));
        meta.add_property(auxc, &self.item_ids, true);

        let master_items = resolve_reference_items(services, &self.refs_list, &self.idxs_list)?;
        for &aux_item in &self.item_ids {
            meta.add_references(FourCC::new(b"auxl"), aux_item, &master_items);
        }
        Ok(())
    }
}
