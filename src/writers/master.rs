//! Master image writer: coded pictures as `hvc1`/`avc1`/`vvc1` items.

use std::path::PathBuf;

use crate::boxes::codecbox::{AvcConfigurationBox, HevcConfigurationBox, VvcConfigurationBox};
use crate::boxes::iinf::ItemInfoEntry;
use crate::boxes::iloc::{ConstructionMethod, ItemLocation};
use crate::boxes::iprp::ItemProperty;
use crate::boxes::meta::MetaBox;
use crate::boxes::properties::ImageSpatialExtentsProperty;
use crate::codec::{parse_annexb_file, CodeType, DecoderConfig};
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::media::MediaStore;
use crate::writers::{display_dimension, Layout, MdatExtent, MetaWriter};
use crate::{Error, Result};

pub(crate) struct MasterImageWriter {
    context_id: ContextId,
    handler_type: FourCC,
    code_type: CodeType,
    file_path: PathBuf,
    disp_xdim: u32,
    disp_ydim: u32,
    hidden: bool,
    config: Option<DecoderConfig>,
    item_ids: Vec<u32>,
    extents: Vec<MdatExtent>,
}

impl MasterImageWriter {
    pub fn new(
        context_id: ContextId,
        master: &crate::config::Master,
    ) -> Result<Self> {
        Ok(Self {
            context_id,
            handler_type: FourCC::try_from(master.hdlr_type.as_str())?,
            code_type: CodeType::from_tag(FourCC::try_from(master.code_type.as_str())?)?,
            file_path: master.file_path.clone(),
            disp_xdim: master.disp_xdim,
            disp_ydim: master.disp_ydim,
            hidden: master.hidden,
            config: None,
            item_ids: Vec::new(),
            extents: Vec::new(),
        })
    }

    fn decoder_config(&self) -> Result<&DecoderConfig> {
        self.config
            .as_ref()
            .ok_or(Error::Inconsistent("writer composed before prepare"))
    }
}

/// Wrap a decoder config record as the matching item property.
pub(crate) fn config_property(config: &DecoderConfig) -> ItemProperty {
    match config {
        DecoderConfig::Hevc(record) => {
            ItemProperty::HevcConfig(HevcConfigurationBox::new(record.clone()))
        }
        DecoderConfig::Avc(record) => {
            ItemProperty::AvcConfig(AvcConfigurationBox::new(record.clone()))
        }
        DecoderConfig::Vvc(record) => {
            ItemProperty::VvcConfig(VvcConfigurationBox::new(record.clone()))
        }
    }
}

impl MetaWriter for MasterImageWriter {
    fn prepare(&mut self, services: &mut Services, media: &mut MediaStore) -> Result<()> {
        let parsed = parse_annexb_file(&self.file_path, self.code_type, 0.0)?;
        for sample in &parsed.samples {
            let extent = media.add_sample(self.context_id, sample)?;
            self.extents.push(extent);
            self.item_ids.push(services.allocate_item_id());
        }
        let width = display_dimension(self.disp_xdim, parsed.config.pic_width());
        let height = display_dimension(self.disp_ydim, parsed.config.pic_height());
        self.disp_xdim = width;
        self.disp_ydim = height;

        let store = services.store_mut(self.context_id)?;
        for &item_id in &self.item_ids {
            store.set(keys::ITEM_ID, item_id.to_string());
        }
        store.set(keys::WIDTH, width.to_string());
        store.set(keys::HEIGHT, height.to_string());
        store.set(keys::CODE_TYPE, self.code_type.tag().to_string());

        self.config = Some(parsed.config);
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, layout: &Layout, _services: &Services) -> Result<()> {
        meta.set_handler_type(self.handler_type);

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
        meta.add_property(config_property(self.decoder_config()?), &self.item_ids, true);
        Ok(())
    }
}
