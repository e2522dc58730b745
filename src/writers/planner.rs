//! The file planner: turns a validated configuration into a finished file.
//!
//! The output layout is `ftyp | meta | moov | mdat…`. Sizes of `meta` and
//! `moov` depend on the offsets written inside them (`iloc` extents, chunk
//! offsets), and those offsets depend on the sizes, so the planner composes
//! and serializes repeatedly until the layout reaches a fixpoint. The only
//! size-changing decisions are one-shot width promotions (32 → 64-bit
//! offset fields), so the loop settles within a few passes.

use std::io::Write;

use crate::bitstream::BitStream;
use crate::boxes::ftyp::FileTypeBox;
use crate::boxes::meta::MetaBox;
use crate::boxes::moov::MovieBox;
use crate::config::Configuration;
use crate::fourcc::FourCC;
use crate::store::{ContextId, Services};
use crate::writers::auxiliary::AuxiliaryImageWriter;
use crate::writers::derived::{
    GridImageWriter, IdentityDerivedWriter, OverlayImageWriter, PreDerivedWriter,
};
use crate::writers::egroup::EntityGroupWriter;
use crate::writers::layer::LayerImageWriter;
use crate::writers::master::MasterImageWriter;
use crate::writers::media::MediaStore;
use crate::writers::metadata::MetadataWriter;
use crate::writers::property::PropertyWriter;
use crate::writers::thumbs::ThumbImageWriter;
use crate::writers::track::SequenceTrackWriter;
use crate::writers::{Layout, MetaWriter, TrackContentWriter};
use crate::{Error, Result};

/// The layout fixpoint must settle in two passes plus slack for the 64-bit
/// promotions; anything longer means offsets are oscillating.
const MAX_LAYOUT_PASSES: u32 = 5;

/// Write the configured file to `general.output_file`.
///
/// The file is staged under a temporary name and renamed into place, so a
/// failure leaves no partial output.
pub fn write_file(config: &Configuration) -> std::result::Result<(), Error> {
    let path = &config.general.output_file;
    let mut planner = FileWriter::new();
    let regions = planner.plan(config)?;

    let tmp_path = path.with_extension("tmp");
    let mut file =
        std::fs::File::create(&tmp_path).map_err(|e| Error::FileIo(tmp_path.clone(), e))?;
    let mut emit = regions.emit(&mut file, &planner.media);
    if emit.is_ok() {
        emit = file.flush().map_err(Error::from);
    }
    match emit {
        Ok(()) => {
            std::fs::rename(&tmp_path, path).map_err(|e| Error::FileIo(path.clone(), e))?;
            Ok(())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(err)
        }
    }
}

/// Write the configured file to an arbitrary sink, ignoring
/// `general.output_file`.
pub fn write_file_to<W: Write>(config: &Configuration, out: &mut W) -> std::result::Result<(), Error> {
    let mut planner = FileWriter::new();
    let regions = planner.plan(config)?;
    regions.emit(out, &planner.media)
}

/// Serialized metadata regions of the planned file; the media data stays in
/// the planner's staging store until emitted.
struct PlannedRegions {
    ftyp: BitStream,
    meta: Option<BitStream>,
    moov: Option<BitStream>,
}

impl PlannedRegions {
    fn emit<W: Write>(&self, out: &mut W, media: &MediaStore) -> Result<()> {
        out.write_all(self.ftyp.storage())?;
        if let Some(meta) = &self.meta {
            out.write_all(meta.storage())?;
        }
        if let Some(moov) = &self.moov {
            out.write_all(moov.storage())?;
        }
        media.write_to(out)
    }
}

struct FileWriter {
    services: Services,
    media: MediaStore,
    meta_writers: Vec<Box<dyn MetaWriter>>,
    track_writers: Vec<SequenceTrackWriter>,
    primary: Option<(u32, u32)>,
}

impl FileWriter {
    fn new() -> Self {
        Self {
            services: Services::new(),
            media: MediaStore::new(),
            meta_writers: Vec::new(),
            track_writers: Vec::new(),
            primary: None,
        }
    }

    fn plan(&mut self, config: &Configuration) -> Result<PlannedRegions> {
        config.validate()?;
        self.services.reset();
        self.primary = config
            .general
            .prim_refr
            .zip(config.general.prim_indx);

        self.create_writers(config)?;

        // Phase A: parse inputs, allocate IDs, stage media data.
        for writer in &mut self.meta_writers {
            writer.prepare(&mut self.services, &mut self.media)?;
        }
        for writer in &mut self.track_writers {
            writer.prepare(&mut self.services, &mut self.media)?;
        }

        let ftyp = self.write_ftyp(config)?;

        // Phases B and C: compose with provisional offsets, measure, and
        // recompose until the measured layout stops moving.
        let mut meta_size = 0u64;
        let mut moov_size = 0u64;
        for _ in 0..MAX_LAYOUT_PASSES {
            let layout = self.make_layout(ftyp.size(), meta_size, moov_size);
            let (meta, meta_bytes, moov_bytes) = self.compose(&layout)?;
            let new_meta_size = meta_bytes.as_ref().map_or(0, BitStream::size);
            let new_moov_size = moov_bytes.as_ref().map_or(0, BitStream::size);
            if new_meta_size == meta_size && new_moov_size == moov_size {
                self.verify(&meta, ftyp.size(), meta_size, moov_size)?;
                return Ok(PlannedRegions {
                    ftyp,
                    meta: meta_bytes,
                    moov: moov_bytes,
                });
            }
            meta_size = new_meta_size;
            moov_size = new_moov_size;
        }
        Err(Error::Inconsistent("file layout failed to reach a fixpoint"))
    }

    /// Create writers in a fixed order: the master of every content first,
    /// then per content its thumbnails, auxiliary images, derived images,
    /// properties, metadata and layers, and finally the entity groups.
    /// Context IDs, and with them the mdat order, follow this order.
    fn create_writers(&mut self, config: &Configuration) -> Result<()> {
        let mut master_contexts = Vec::with_capacity(config.content.len());
        for content in &config.content {
            let context = self.services.allocate_context();
            self.map_bsid(content.master.uniq_bsid, context)?;
            master_contexts.push(context);
            if content.master.encp_type == "trak" {
                self.track_writers
                    .push(SequenceTrackWriter::for_master(context, &content.master)?);
            } else {
                self.meta_writers
                    .push(Box::new(MasterImageWriter::new(context, &content.master)?));
            }
        }

        for (content, &master_context) in config.content.iter().zip(&master_contexts) {
            let is_track = content.master.encp_type == "trak";
            if is_track && !(content.auxiliary.is_empty()
                && content.metadata.is_empty()
                && content.layers.is_empty()
                && content.derived.grids.is_empty()
                && content.derived.iovls.is_empty()
                && content.derived.irots.is_empty()
                && content.derived.imirs.is_empty()
                && content.derived.rlocs.is_empty()
                && content.derived.claps.is_empty()
                && content.derived.prederiveds.is_empty())
            {
                return Err(Error::ConfigInvalid(
                    "auxiliary, derived, metadata and layer content requires meta encapsulation"
                        .into(),
                ));
            }

            for thumbs in &content.thumbs {
                let context = self.services.allocate_context();
                self.map_bsid(thumbs.uniq_bsid, context)?;
                if is_track {
                    self.track_writers.push(SequenceTrackWriter::for_thumbs(
                        context,
                        master_context,
                        thumbs,
                        content.master.disp_rate,
                    )?);
                } else {
                    self.meta_writers.push(Box::new(ThumbImageWriter::new(
                        context,
                        master_context,
                        thumbs,
                    )?));
                }
            }
            for auxiliary in &content.auxiliary {
                let context = self.services.allocate_context();
                self.map_bsid(auxiliary.uniq_bsid, context)?;
                self.meta_writers.push(Box::new(AuxiliaryImageWriter::new(
                    context,
                    auxiliary,
                    &content.master.code_type,
                )?));
            }

            for irot in &content.derived.irots {
                let context = self.services.allocate_context();
                self.map_bsid(irot.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(IdentityDerivedWriter::from_irot(context, irot)));
            }
            for imir in &content.derived.imirs {
                let context = self.services.allocate_context();
                self.map_bsid(imir.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(IdentityDerivedWriter::from_imir(context, imir)));
            }
            for rloc in &content.derived.rlocs {
                let context = self.services.allocate_context();
                self.map_bsid(rloc.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(IdentityDerivedWriter::from_rloc(context, rloc)));
            }
            for clap in &content.derived.claps {
                let context = self.services.allocate_context();
                self.map_bsid(clap.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(IdentityDerivedWriter::from_clap(context, clap)));
            }
            for prederived in &content.derived.prederiveds {
                let context = self.services.allocate_context();
                self.map_bsid(prederived.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(PreDerivedWriter::new(prederived)));
            }
            for grid in &content.derived.grids {
                let context = self.services.allocate_context();
                self.map_bsid(grid.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(GridImageWriter::new(context, grid)));
            }
            for iovl in &content.derived.iovls {
                let context = self.services.allocate_context();
                self.map_bsid(iovl.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(OverlayImageWriter::new(context, iovl)));
            }

            let property_writer = PropertyWriter::new(&content.property);
            if !property_writer.is_empty() {
                self.services.allocate_context();
                self.meta_writers.push(Box::new(property_writer));
            }

            for metadata in &content.metadata {
                let context = self.services.allocate_context();
                self.meta_writers.push(Box::new(MetadataWriter::new(
                    context,
                    master_context,
                    metadata,
                )?));
            }
            for layer in &content.layers {
                let context = self.services.allocate_context();
                self.map_bsid(layer.uniq_bsid, context)?;
                self.meta_writers
                    .push(Box::new(LayerImageWriter::new(context, layer)?));
            }
        }

        if !config.egroups.altr.idxs_lists.is_empty() {
            self.services.allocate_context();
            self.meta_writers.push(Box::new(EntityGroupWriter::new(
                &config.egroups.altr.idxs_lists,
            )));
        }
        Ok(())
    }

    /// uniq_bsid 0 means "not referenced from anywhere".
    fn map_bsid(&mut self, uniq_bsid: u32, context: ContextId) -> Result<()> {
        if uniq_bsid != 0 {
            self.services.map_bsid(uniq_bsid, context)?;
        }
        Ok(())
    }

    fn write_ftyp(&self, config: &Configuration) -> Result<BitStream> {
        let major = FourCC::try_from(config.general.brands.major.as_str())?;
        let mut ftyp = FileTypeBox::new(major);
        ftyp.add_compatible_brand(major);
        for brand in &config.general.brands.other {
            ftyp.add_compatible_brand(FourCC::try_from(brand.as_str())?);
        }
        let mut w = BitStream::new();
        ftyp.write_box(&mut w)?;
        Ok(w)
    }

    /// Absolute offsets given the current root box sizes. Writers see the
    /// payload offset of their context's mdat.
    fn make_layout(&self, ftyp_size: u64, meta_size: u64, moov_size: u64) -> Layout {
        let mut layout = Layout::default();
        let mut offset = ftyp_size + meta_size + moov_size;
        for (context, mdat) in self.media.iter() {
            layout.set_mdat_payload_offset(context, offset + mdat.header_size());
            offset += mdat.box_size();
        }
        layout
    }

    fn compose(
        &self,
        layout: &Layout,
    ) -> Result<(MetaBox, Option<BitStream>, Option<BitStream>)> {
        let mut meta = MetaBox::new();
        for writer in &self.meta_writers {
            writer.compose(&mut meta, layout, &self.services)?;
        }
        if let Some((prim_refr, prim_indx)) = self.primary {
            meta.set_primary_item(self.services.item_id_at(prim_refr, prim_indx)?)?;
        }

        let meta_bytes = if self.meta_writers.is_empty() {
            None
        } else {
            let mut w = BitStream::new();
            meta.write_box(&mut w)?;
            Some(w)
        };

        let moov_bytes = if self.track_writers.is_empty() {
            None
        } else {
            let mut moov = MovieBox::default();
            moov.mvhd.next_track_id = self.services.next_track_id();
            for writer in &self.track_writers {
                writer.compose(&mut moov, layout, &self.services)?;
            }
            let mut w = BitStream::new();
            moov.write_box(&mut w)?;
            Some(w)
        };

        Ok((meta, meta_bytes, moov_bytes))
    }

    /// Check the layout invariants on the final pass: extents land inside
    /// an emitted mdat, property associations point at real properties, the
    /// primary item and all reference endpoints are declared items.
    fn verify(
        &self,
        meta: &MetaBox,
        ftyp_size: u64,
        meta_size: u64,
        moov_size: u64,
    ) -> Result<()> {
        let mut mdat_ranges = Vec::new();
        let mut offset = ftyp_size + meta_size + moov_size;
        for (_, mdat) in self.media.iter() {
            let payload_start = offset + mdat.header_size();
            mdat_ranges.push(payload_start..payload_start + mdat.payload_size());
            offset += mdat.box_size();
        }

        for item in meta.locations().items() {
            for extent in &item.extents {
                if extent.extent_length == 0 {
                    continue;
                }
                match item.construction_method {
                    crate::boxes::iloc::ConstructionMethod::FileOffset => {
                        let covered = mdat_ranges.iter().any(|range| {
                            extent.extent_offset >= range.start
                                && extent.extent_offset + extent.extent_length <= range.end
                        });
                        if !covered {
                            return Err(Error::Inconsistent(
                                "iloc extent points outside every mdat",
                            ));
                        }
                    }
                    crate::boxes::iloc::ConstructionMethod::IdatOffset => {}
                    crate::boxes::iloc::ConstructionMethod::ItemOffset => {
                        return Err(Error::Inconsistent("unexpected item-offset extent"));
                    }
                }
            }
            if meta.items().entry_by_id(item.item_id).is_none() {
                return Err(Error::Inconsistent("iloc entry for an undeclared item"));
            }
        }

        meta.properties().verify_associations()?;

        for reference in meta.references().references() {
            if meta.items().entry_by_id(reference.from_item_id).is_none() {
                return Err(Error::Inconsistent("reference from an undeclared item"));
            }
            for &to_item in &reference.to_item_ids {
                if meta.items().entry_by_id(to_item).is_none() {
                    return Err(Error::Inconsistent("reference to an undeclared item"));
                }
            }
        }

        if let Some(primary_item_id) = meta.primary_item_id() {
            if meta.items().entry_by_id(primary_item_id).is_none() {
                return Err(Error::Inconsistent("primary item is not a declared item"));
            }
        }
        Ok(())
    }
}
