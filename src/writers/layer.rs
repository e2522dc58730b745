//! Layer writer: multi-layer HEVC images as `lhv1` items with layer
//! selection and target output layer properties.

use std::path::PathBuf;

use crate::boxes::iinf::ItemInfoEntry;
use crate::boxes::iloc::{ConstructionMethod, ItemLocation};
use crate::boxes::iprp::ItemProperty;
use crate::boxes::meta::MetaBox;
use crate::boxes::properties::{
    ImageSpatialExtentsProperty, LayerSelectorProperty, TargetOlsProperty,
};
use crate::codec::{parse_annexb_file, CodeType, DecoderConfig};
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::master::config_property;
use crate::writers::media::MediaStore;
use crate::writers::{Layout, MdatExtent, MetaWriter};
use crate::{Error, Result};

pub(crate) struct LayerImageWriter {
    context_id: ContextId,
    code_type: CodeType,
    file_path: PathBuf,
    hidden: bool,
    target_output_layer: u32,
    layer_selection: Option<i32>,
    config: Option<DecoderConfig>,
    width: u32,
    height: u32,
    item_ids: Vec<u32>,
    extents: Vec<MdatExtent>,
}

impl LayerImageWriter {
    pub fn new(context_id: ContextId, layer: &crate::config::Layer) -> Result<Self> {
        Ok(Self {
            context_id,
            code_type: CodeType::from_tag(FourCC::try_from(layer.code_type.as_str())?)?,
            file_path: layer.file_path.clone(),
            hidden: layer.hidden,
            target_output_layer: layer.target_output_layer,
            layer_selection: layer.layer_selection,
            config: None,
            width: 0,
            height: 0,
            item_ids: Vec::new(),
            extents: Vec::new(),
        })
    }
}

impl MetaWriter for LayerImageWriter {
    fn prepare(&mut self, services: &mut Services, media: &mut MediaStore) -> Result<()> {
        let parsed = parse_annexb_file(&self.file_path, self.code_type, 0.0)?;
        for sample in &parsed.samples {
            let extent = media.add_sample(self.context_id, sample)?;
            self.extents.push(extent);
            self.item_ids.push(services.allocate_item_id());
        }
        self.width = parsed.config.pic_width();
        self.height = parsed.config.pic_height();

        let store = services.store_mut(self.context_id)?;
        for &item_id in &self.item_ids {
            store.set(keys::ITEM_ID, item_id.to_string());
        }
        store.set(keys::WIDTH, self.width.to_string());
        store.set(keys::HEIGHT, self.height.to_string());

        self.config = Some(parsed.config);
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, layout: &Layout, _services: &Services) -> Result<()> {
        meta.set_handler_type(FourCC::new(b"pict"));

        for (&item_id, extent) in self.item_ids.iter().zip(&self.extents) {
            let mut entry = ItemInfoEntry::new(item_id, self.code_type.tag());
            entry.set_hidden(self.hidden);
            meta.add_item(entry);
            let mut location = ItemLocation::new(item_id, ConstructionMethod::FileOffset);
            location.add_extent(layout.resolve(extent), extent.length);
            meta.add_location(location);
        }

        let ispe = ItemProperty::Ispe(ImageSpatialExtentsProperty::new(self.width, self.height));
        meta.add_property(ispe, &self.item_ids, false);
        let config = self
            .config
            .as_ref()
            .ok_or(Error::Inconsistent("writer composed before prepare"))?;
        meta.add_property(config_property(config), &self.item_ids, true);

        let tols = ItemProperty::Tols(TargetOlsProperty::new(self.target_output_layer as u16));
        meta.add_property(tols, &self.item_ids, true);
        if let Some(layer_id) = self.layer_selection.filter(|&v| v >= 0) {
            let lsel = ItemProperty::Lsel(LayerSelectorProperty::new(layer_id as u16));
            meta.add_property(lsel, &self.item_ids, true);
        }
        Ok(())
    }
}
