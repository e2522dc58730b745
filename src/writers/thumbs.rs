//! Thumbnail writer: scaled-down companions of selected master pictures.

use std::path::PathBuf;

use crate::boxes::iinf::ItemInfoEntry;
use crate::boxes::iloc::{ConstructionMethod, ItemLocation};
use crate::boxes::iprp::ItemProperty;
use crate::boxes::meta::MetaBox;
use crate::boxes::properties::ImageSpatialExtentsProperty;
use crate::codec::{parse_annexb_file, CodeType, DecoderConfig};
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::master::config_property;
use crate::writers::media::MediaStore;
use crate::writers::{display_dimension, Layout, MdatExtent, MetaWriter};
use crate::{Error, Result};

pub(crate) struct ThumbImageWriter {
    context_id: ContextId,
    master_context: ContextId,
    code_type: CodeType,
    file_path: PathBuf,
    disp_xdim: u32,
    disp_ydim: u32,
    sync_rate: u32,
    sync_idxs: Vec<u32>,
    config: Option<DecoderConfig>,
    item_ids: Vec<u32>,
    extents: Vec<MdatExtent>,
}

impl ThumbImageWriter {
    pub fn new(
        context_id: ContextId,
        master_context: ContextId,
        thumbs: &crate::config::Thumbs,
    ) -> Result<Self> {
        Ok(Self {
            context_id,
            master_context,
            code_type: CodeType::from_tag(FourCC::try_from(thumbs.code_type.as_str())?)?,
            file_path: thumbs.file_path.clone(),
            disp_xdim: thumbs.disp_xdim,
            disp_ydim: thumbs.disp_ydim,
            sync_rate: thumbs.sync_rate,
            sync_idxs: thumbs.sync_idxs.clone(),
            config: None,
            item_ids: Vec::new(),
            extents: Vec::new(),
        })
    }

    /// 1-based master picture numbers that receive a thumbnail.
    fn selected_masters(&self, master_count: usize) -> Vec<u32> {
        if !self.sync_idxs.is_empty() {
            self.sync_idxs.clone()
        } else if self.sync_rate > 0 {
            (1..=master_count as u32)
                .step_by(self.sync_rate as usize)
                .collect()
        } else {
            (1..=master_count as u32).collect()
        }
    }
}

impl MetaWriter for ThumbImageWriter {
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

        let master_items = services
            .store(self.master_context)?
            .get_numbers(keys::ITEM_ID)?;
        let selection = self.selected_masters(master_items.len());
        if selection.len() != self.item_ids.len() {
            warn!(
                "{} thumbnails for {} selected master pictures",
                self.item_ids.len(),
                selection.len()
            );
        }

        for (&item_id, extent) in self.item_ids.iter().zip(&self.extents) {
            meta.add_item(ItemInfoEntry::new(item_id, self.code_type.tag()));
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

        for (&thumb_item, &master_number) in self.item_ids.iter().zip(&selection) {
            let master_index = master_number
                .checked_sub(1)
                .and_then(|i| master_items.get(i as usize))
                .ok_or_else(|| {
                    Error::ConfigInvalid(format!(
                        "thumbnail cites master picture {master_number} of {}",
                        master_items.len()
                    ))
                })?;
            meta.add_references(FourCC::new(b"thmb"), thumb_item, &[*master_index]);
        }
        Ok(())
    }
}
