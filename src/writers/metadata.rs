//! Metadata writer: Exif and XML items describing the master images.

use std::path::PathBuf;

use crate::boxes::iinf::ItemInfoEntry;
use crate::boxes::iloc::{ConstructionMethod, ItemLocation};
use crate::boxes::meta::MetaBox;
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::media::MediaStore;
use crate::writers::{Layout, MdatExtent, MetaWriter};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetadataKind {
    Exif,
    Xml,
}

pub(crate) struct MetadataWriter {
    context_id: ContextId,
    master_context: ContextId,
    kind: MetadataKind,
    file_path: PathBuf,
    item_id: u32,
    extent: Option<MdatExtent>,
}

impl MetadataWriter {
    pub fn new(
        context_id: ContextId,
        master_context: ContextId,
        metadata: &crate::config::Metadata,
    ) -> Result<Self> {
        let kind = match metadata.hdlr_type.as_str() {
            "exif" => MetadataKind::Exif,
            "xml1" => MetadataKind::Xml,
            other => {
                return Err(Error::ConfigInvalid(format!(
                    "unknown metadata handler '{other}'"
                )))
            }
        };
        Ok(Self {
            context_id,
            master_context,
            kind,
            file_path: metadata.file_path.clone(),
            item_id: 0,
            extent: None,
        })
    }
}

impl MetaWriter for MetadataWriter {
    fn prepare(&mut self, services: &mut Services, media: &mut MediaStore) -> Result<()> {
        let bytes = std::fs::read(&self.file_path)
            .map_err(|cause| Error::FileIo(self.file_path.clone(), cause))?;
        let payload = match self.kind {
            MetadataKind::Exif => {
                // exif_tiff_header_offset, zero when the TIFF header starts
                // right after this field. See ISO 23008-12:2017 § A.2.1
                let mut payload = vec![0u8; 4];
                payload.extend_from_slice(&bytes);
                payload
            }
            MetadataKind::Xml => bytes,
        };
        self.extent = Some(media.add_data(self.context_id, &payload)?);
        self.item_id = services.allocate_item_id();
        services
            .store_mut(self.context_id)?
            .set(keys::ITEM_ID, self.item_id.to_string());
        Ok(())
    }

    fn compose(&self, meta: &mut MetaBox, layout: &Layout, services: &Services) -> Result<()> {
        let mut entry = match self.kind {
            MetadataKind::Exif => ItemInfoEntry::new(self.item_id, FourCC::new(b"Exif")),
            MetadataKind::Xml => {
                let mut entry = ItemInfoEntry::new(self.item_id, FourCC::new(b"mime"));
                entry.content_type = Some("application/xml".into());
                entry
            }
        };
        entry.item_name = match self.kind {
            MetadataKind::Exif => "Exif data".into(),
            MetadataKind::Xml => "XML data".into(),
        };
        meta.add_item(entry);

        let extent = self
            .extent
            .ok_or(Error::Inconsistent("writer composed before prepare"))?;
        let mut location = ItemLocation::new(self.item_id, ConstructionMethod::FileOffset);
        location.add_extent(layout.resolve(&extent), extent.length);
        meta.add_location(location);

        let master_items = services
            .store(self.master_context)?
            .get_numbers(keys::ITEM_ID)?;
        meta.add_references(FourCC::new(b"cdsc"), self.item_id, &master_items);
        Ok(())
    }
}
