//! Entity-group writer: `altr` groupings under `grpl`.

use crate::boxes::meta::{EntityToGroupBox, MetaBox};
use crate::config::AltrIndexPair;
use crate::fourcc::FourCC;
use crate::store::{keys, Services};
use crate::writers::media::MediaStore;
use crate::writers::{Layout, MetaWriter};
use crate::Result;

pub(crate) struct EntityGroupWriter {
    groups: Vec<Vec<AltrIndexPair>>,
    /// Group IDs share the item-ID space so they can never collide with an
    /// item in the same meta box.
    group_ids: Vec<u32>,
}

impl EntityGroupWriter {
    pub fn new(groups: &[Vec<AltrIndexPair>]) -> Self {
        Self {
            groups: groups.to_vec(),
            group_ids: Vec::new(),
        }
    }
}

impl MetaWriter for EntityGroupWriter {
    fn prepare(&mut self, services: &mut Services, _media: &mut MediaStore) -> Result<()> {
        for _ in &self.groups {
            self.group_ids.push(services.allocate_item_id());
        }
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, _layout: &Layout, services: &Services) -> Result<()> {
        for (group, &group_id) in self.groups.iter().zip(&self.group_ids) {
            let mut entity_ids = Vec::with_capacity(group.len());
            for pair in group {
                let entity_id = if pair.item_indx == 0 {
                    let context = services.context_of(pair.uniq_bsid)?;
                    services.store(context)?.get_numbers(keys::TRACK_ID)?[0]
                } else {
                    services.item_id_at(pair.uniq_bsid, pair.item_indx)?
                };
                entity_ids.push(entity_id);
            }
            meta.add_entity_group(EntityToGroupBox::new(
                FourCC::new(b"altr"),
                group_id,
                entity_ids,
            ));
        }
        Ok(())
    }
}
