//! Track writer: image sequences and video encapsulated in `moov`/`trak`.

use std::path::PathBuf;

use crate::boxes::moov::{
    EditBox, EditUnit, MediaHeaderBox, MediaTypeHeader, MovieBox, SampleEntry, SampleTableBox,
    TrackBox, TrackHeaderBox, TrackReferenceBox,
};
use crate::boxes::sampleentry::{CodingConstraintsBox, VisualSampleEntry};
use crate::codec::{parse_annexb_file, CodeType, DecoderConfig};
use crate::config::{CodingConstraints, EditList, Master, Thumbs};
use crate::fourcc::FourCC;
use crate::store::{keys, ContextId, Services};
use crate::writers::media::MediaStore;
use crate::writers::{display_dimension, Layout, MdatExtent, TrackContentWriter};
use crate::{Error, Result};

/// Movie timescale: milliseconds.
pub(crate) const MOVIE_TIMESCALE: u32 = 1000;

pub(crate) enum TrackRole {
    Master {
        make_vide: bool,
        write_alternates: bool,
    },
    Thumb {
        master_context: ContextId,
    },
}

pub(crate) struct SequenceTrackWriter {
    context_id: ContextId,
    role: TrackRole,
    code_type: CodeType,
    file_path: PathBuf,
    handler_type: FourCC,
    disp_xdim: u32,
    disp_ydim: u32,
    disp_rate: u32,
    tick_rate: u32,
    edit_list: Option<EditList>,
    ccst: CodingConstraints,
    track_id: u32,
    vide_track_id: Option<u32>,
    alternate_group: u16,
    config: Option<DecoderConfig>,
    extents: Vec<MdatExtent>,
    sync_samples: Vec<u32>,
}

impl SequenceTrackWriter {
    pub fn for_master(context_id: ContextId, master: &Master) -> Result<Self> {
        Ok(Self {
            context_id,
            role: TrackRole::Master {
                make_vide: master.make_vide,
                write_alternates: master.write_alternates,
            },
            code_type: CodeType::from_tag(FourCC::try_from(master.code_type.as_str())?)?,
            file_path: master.file_path.clone(),
            handler_type: FourCC::try_from(master.hdlr_type.as_str())?,
            disp_xdim: master.disp_xdim,
            disp_ydim: master.disp_ydim,
            disp_rate: master.disp_rate,
            tick_rate: master.tick_rate,
            edit_list: master.edit_list.clone(),
            ccst: master.ccst.clone().unwrap_or_default(),
            track_id: 0,
            vide_track_id: None,
            alternate_group: 0,
            config: None,
            extents: Vec::new(),
            sync_samples: Vec::new(),
        })
    }

    pub fn for_thumbs(
        context_id: ContextId,
        master_context: ContextId,
        thumbs: &Thumbs,
        disp_rate: u32,
    ) -> Result<Self> {
        Ok(Self {
            context_id,
            role: TrackRole::Thumb { master_context },
            code_type: CodeType::from_tag(FourCC::try_from(thumbs.code_type.as_str())?)?,
            file_path: thumbs.file_path.clone(),
            handler_type: FourCC::try_from(thumbs.hdlr_type.as_str())?,
            disp_xdim: thumbs.disp_xdim,
            disp_ydim: thumbs.disp_ydim,
            disp_rate,
            tick_rate: thumbs.tick_rate,
            edit_list: thumbs.edit_list.clone(),
            ccst: thumbs.ccst.clone().unwrap_or_default(),
            track_id: 0,
            vide_track_id: None,
            alternate_group: 0,
            config: None,
            extents: Vec::new(),
            sync_samples: Vec::new(),
        })
    }

    fn sample_delta(&self) -> u32 {
        self.tick_rate / self.disp_rate
    }

    fn media_duration(&self) -> u32 {
        self.extents.len() as u32 * self.sample_delta()
    }

    fn movie_duration(&self) -> u32 {
        (self.extents.len() as u64 * u64::from(MOVIE_TIMESCALE) / u64::from(self.disp_rate)) as u32
    }

    fn edit_box(&self) -> Result<EditBox> {
        let mut edit = EditBox::default();
        let Some(edit_list) = &self.edit_list else {
            return Ok(edit);
        };
        let mut entries = Vec::new();
        for unit in &edit_list.edit_unit {
            let media_time = (u64::from(unit.mdia_time) * u64::from(self.tick_rate)
                / u64::from(MOVIE_TIMESCALE)) as i32;
            let entry = match unit.edit_type.as_str() {
                "empty" => EditUnit {
                    segment_duration: unit.time_span,
                    media_time: -1,
                    media_rate_integer: 1,
                },
                "dwell" => EditUnit {
                    segment_duration: unit.time_span,
                    media_time,
                    media_rate_integer: 0,
                },
                "shift" => EditUnit {
                    segment_duration: unit.time_span,
                    media_time,
                    media_rate_integer: 1,
                },
                other => {
                    return Err(Error::ConfigInvalid(format!(
                        "unknown edit unit type '{other}'"
                    )))
                }
            };
            entries.push(entry);
        }
        let repetitions = match edit_list.numb_rept {
            r if r < 0 => {
                warn!("infinite edit list looping cannot be expressed; playing once");
                1
            }
            r => r as usize + 1,
        };
        for _ in 0..repetitions {
            edit.entries.extend(entries.iter().copied());
        }
        Ok(edit)
    }

    fn build_track(
        &self,
        track_id: u32,
        handler_type: FourCC,
        layout: &Layout,
        services: &Services,
    ) -> Result<TrackBox> {
        let config = self
            .config
            .as_ref()
            .ok_or(Error::Inconsistent("writer composed before prepare"))?;

        let mut tkhd = TrackHeaderBox::new(track_id);
        tkhd.width = display_dimension(self.disp_xdim, config.pic_width());
        tkhd.height = display_dimension(self.disp_ydim, config.pic_height());
        tkhd.alternate_group = self.alternate_group;
        let edts = self.edit_box()?;
        tkhd.duration = if edts.is_empty() {
            self.movie_duration()
        } else {
            edts.entries.iter().map(|e| e.segment_duration).sum()
        };

        let mut tref = TrackReferenceBox::default();
        if let TrackRole::Thumb { master_context } = &self.role {
            let master_track = services
                .store(*master_context)?
                .get_numbers(keys::TRACK_ID)?[0];
            tref.add_reference(FourCC::new(b"thmb"), &[master_track]);
        }

        let mut entry = VisualSampleEntry::new(
            self.code_type.tag(),
            config.pic_width() as u16,
            config.pic_height() as u16,
            config.clone(),
        );
        entry.ccst = Some(CodingConstraintsBox {
            all_ref_pics_intra: self.ccst.all_ref_pics_intra,
            intra_pred_used: self.ccst.intra_pred_used,
            max_ref_pic_used: self.ccst.max_ref_per_pic,
        });

        let first_offset = self
            .extents
            .first()
            .map(|extent| layout.resolve(extent))
            .ok_or(Error::Inconsistent("track without samples"))?;
        let all_sync = self.sync_samples.len() == self.extents.len();
        let stbl = SampleTableBox {
            entries: vec![SampleEntry::Visual(entry)],
            time_to_sample: vec![(self.extents.len() as u32, self.sample_delta())],
            composition_offsets: vec![],
            sample_to_chunk: vec![(1, self.extents.len() as u32, 1)],
            sample_sizes: self.extents.iter().map(|e| e.length as u32).collect(),
            chunk_offsets: vec![first_offset],
            sync_samples: if all_sync {
                None
            } else {
                Some(self.sync_samples.clone())
            },
        };

        Ok(TrackBox {
            tkhd,
            tref,
            edts,
            mdhd: MediaHeaderBox {
                timescale: self.tick_rate,
                duration: self.media_duration(),
            },
            handler_type,
            media_type_header: MediaTypeHeader::Video,
            stbl,
        })
    }
}

impl TrackContentWriter for SequenceTrackWriter {
    fn prepare(&mut self, services: &mut Services, media: &mut MediaStore) -> Result<()> {
        let parsed = parse_annexb_file(&self.file_path, self.code_type, f64::from(self.disp_rate))?;
        for (index, sample) in parsed.samples.iter().enumerate() {
            let extent = media.add_sample(self.context_id, sample)?;
            self.extents.push(extent);
            if sample.is_sync {
                self.sync_samples.push(index as u32 + 1);
            }
        }
        self.track_id = services.allocate_track_id();
        if let TrackRole::Master {
            make_vide: true,
            write_alternates,
        } = self.role
        {
            self.vide_track_id = Some(services.allocate_track_id());
            if write_alternates {
                self.alternate_group = self.track_id as u16;
            }
        }

        let store = services.store_mut(self.context_id)?;
        store.set(keys::TRACK_ID, self.track_id.to_string());
        store.set(keys::WIDTH, parsed.config.pic_width().to_string());
        store.set(keys::HEIGHT, parsed.config.pic_height().to_string());
        self.config = Some(parsed.config);
        Ok(())
    }

    fn compose(&self, moov: &mut MovieBox, layout: &Layout, services: &Services) -> Result<()> {
        let track = self.build_track(self.track_id, self.handler_type, layout, services)?;
        let movie_duration = track.tkhd.duration;
        moov.tracks.push(track);
        if let Some(vide_track_id) = self.vide_track_id {
            let track = self.build_track(vide_track_id, FourCC::new(b"vide"), layout, services)?;
            moov.tracks.push(track);
        }
        moov.mvhd.duration = moov.mvhd.duration.max(movie_duration);
        moov.mvhd.timescale = MOVIE_TIMESCALE;
        Ok(())
    }
}
