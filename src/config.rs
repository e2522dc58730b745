//! Writer input configuration.
//!
//! A declarative description of the output file: one or more contents (a
//! master image or sequence plus its thumbnails, auxiliary images, derived
//! images, metadata and layers) and file-global settings. The JSON loader
//! maps onto these structures directly; values are pre-typed (numbers as
//! numbers, booleans as booleans).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Convenience type for reference indexes: one index vector for each entry
/// of the corresponding `refs_list`.
pub type IndexList = Vec<Vec<u32>>;
/// Convenience type for referenced context `uniq_bsid` values.
pub type ReferenceList = Vec<u32>;

fn default_tick_rate() -> u32 {
    90000
}

fn default_true() -> bool {
    true
}

/// Brands written into `ftyp`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Brands {
    /// Major brand
    pub major: String,
    /// Other brands
    #[serde(default)]
    pub other: Vec<String>,
}

/// Global configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct General {
    /// Output file name
    pub output_file: PathBuf,
    /// Brand configuration
    pub brands: Brands,
    /// uniq_bsid of the context carrying the primary item
    #[serde(default)]
    pub prim_refr: Option<u32>,
    /// 1-based image index of the primary item within that context
    #[serde(default)]
    pub prim_indx: Option<u32>,
}

/// A single edit list unit.
#[derive(Debug, Clone, Deserialize)]
pub struct EditUnit {
    /// Edit unit type ('empty', 'dwell', 'shift')
    pub edit_type: String,
    /// Edit time in media in milliseconds
    pub mdia_time: u32,
    /// Edit unit length in milliseconds
    pub time_span: u32,
}

/// Edit list for tracks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditList {
    /// -1 = infinite looping, otherwise extra repetitions (0 = play once)
    #[serde(default)]
    pub numb_rept: i32,
    /// Edit units in the order they should be applied
    #[serde(default)]
    pub edit_unit: Vec<EditUnit>,
}

/// Coding constraints written into track sample entries.
#[derive(Debug, Clone, Deserialize)]
pub struct CodingConstraints {
    #[serde(default = "default_true")]
    pub all_ref_pics_intra: bool,
    #[serde(default)]
    pub intra_pred_used: bool,
    /// 15 means unknown.
    #[serde(default = "default_ccst_max_ref")]
    pub max_ref_per_pic: u8,
}

fn default_ccst_max_ref() -> u8 {
    15
}

impl Default for CodingConstraints {
    fn default() -> Self {
        Self {
            all_ref_pics_intra: true,
            intra_pred_used: false,
            max_ref_per_pic: 15,
        }
    }
}

/// Master images of one content.
#[derive(Debug, Clone, Deserialize)]
pub struct Master {
    /// Unique identifier for this context, used for referencing from other sections
    pub uniq_bsid: u32,
    /// Bitstream input file
    pub file_path: PathBuf,
    /// Handler type
    #[serde(default = "default_pict")]
    pub hdlr_type: String,
    /// Codec type ('hvc1', 'avc1', ...)
    pub code_type: String,
    /// Encapsulation type: 'meta' or 'trak'
    #[serde(default = "default_meta")]
    pub encp_type: String,
    /// Display width in pixels
    #[serde(default)]
    pub disp_xdim: u32,
    /// Display height in pixels
    #[serde(default)]
    pub disp_ydim: u32,
    /// Display rate in frames per second (tracks only)
    #[serde(default)]
    pub disp_rate: u32,
    /// Tick rate (tracks only)
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Edit list (tracks only)
    #[serde(default)]
    pub edit_list: Option<EditList>,
    /// Also generate a 'vide' handler track as an alternate
    #[serde(default)]
    pub make_vide: bool,
    /// Mark alternate tracks as one alternate group
    #[serde(default = "default_true")]
    pub write_alternates: bool,
    /// True if the images are not intended to be displayed
    #[serde(default)]
    pub hidden: bool,
    /// Coding constraints (tracks only)
    #[serde(default)]
    pub ccst: Option<CodingConstraints>,
}

fn default_pict() -> String {
    "pict".into()
}

fn default_meta() -> String {
    "meta".into()
}

/// Thumbnail images of one content.
#[derive(Debug, Clone, Deserialize)]
pub struct Thumbs {
    pub uniq_bsid: u32,
    pub file_path: PathBuf,
    #[serde(default = "default_pict")]
    pub hdlr_type: String,
    pub code_type: String,
    #[serde(default)]
    pub disp_xdim: u32,
    #[serde(default)]
    pub disp_ydim: u32,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    #[serde(default)]
    pub edit_list: Option<EditList>,
    /// Thumbnail every sync_rate-th master image; 0 disables the rule
    #[serde(default)]
    pub sync_rate: u32,
    /// Explicit 1-based master image numbers, alternative to sync_rate
    #[serde(default)]
    pub sync_idxs: Vec<u32>,
    #[serde(default)]
    pub ccst: Option<CodingConstraints>,
}

/// Exif or XML metadata attached to master images.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    /// Metadata input file
    pub file_path: PathBuf,
    /// Handler type ('exif', 'xml1')
    pub hdlr_type: String,
}

/// Auxiliary images (alpha planes, depth maps) of one content.
#[derive(Debug, Clone, Deserialize)]
pub struct Auxiliary {
    pub uniq_bsid: u32,
    pub file_path: PathBuf,
    /// Codec type; the master's codec when absent
    #[serde(default)]
    pub code_type: Option<String>,
    /// URN specifying the auxiliary image type, e.g.
    /// "urn:mpeg:hevc:2015:auxid:1" (Table F.2 of ISO 23008-2)
    pub urn: String,
    #[serde(default)]
    pub disp_xdim: u32,
    #[serde(default)]
    pub disp_ydim: u32,
    /// uniq_bsids of contexts referenced in idxs_list
    pub refs_list: ReferenceList,
    /// 1-based image indexes, one vector per refs_list entry
    pub idxs_list: IndexList,
    /// True if the images are not intended to be displayed
    #[serde(default)]
    pub hidden: bool,
}

/// Image rotation property configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Irot {
    #[serde(default)]
    pub uniq_bsid: u32,
    #[serde(default = "default_true")]
    pub essential: bool,
    pub refs_list: ReferenceList,
    pub idxs_list: IndexList,
    /// Anti-clockwise rotation; 0, 90, 180 or 270
    pub angle: u32,
}

/// Image mirroring property configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Imir {
    #[serde(default)]
    pub uniq_bsid: u32,
    #[serde(default = "default_true")]
    pub essential: bool,
    pub refs_list: ReferenceList,
    pub idxs_list: IndexList,
    /// True mirrors over a horizontal axis, false over a vertical one
    pub horizontal_axis: bool,
}

/// Relative location property configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Rloc {
    #[serde(default)]
    pub uniq_bsid: u32,
    #[serde(default = "default_true")]
    pub essential: bool,
    pub refs_list: ReferenceList,
    pub idxs_list: IndexList,
    /// Horizontal offset in pixels of the left-most pixel column
    pub horizontal_offset: u32,
    /// Vertical offset in pixels of the top-most pixel row
    pub vertical_offset: u32,
}

/// Clean aperture property configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Clap {
    #[serde(default)]
    pub uniq_bsid: u32,
    #[serde(default = "default_true")]
    pub essential: bool,
    pub refs_list: ReferenceList,
    pub idxs_list: IndexList,
    #[serde(rename = "clapWidthN")]
    pub clap_width_n: u32,
    #[serde(rename = "clapWidthD")]
    pub clap_width_d: u32,
    #[serde(rename = "clapHeightN")]
    pub clap_height_n: u32,
    #[serde(rename = "clapHeightD")]
    pub clap_height_d: u32,
    #[serde(rename = "horizOffN")]
    pub horiz_off_n: u32,
    #[serde(rename = "horizOffD")]
    pub horiz_off_d: u32,
    #[serde(rename = "vertOffN")]
    pub vert_off_n: u32,
    #[serde(rename = "vertOffD")]
    pub vert_off_d: u32,
}

/// Pre-derived coded image configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PreDerived {
    #[serde(default)]
    pub uniq_bsid: u32,
    pub pre_refs_list: ReferenceList,
    pub pre_idxs_list: IndexList,
    pub base_refs_list: ReferenceList,
    pub base_idxs_list: IndexList,
}

/// Image grid derivation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Grid {
    pub uniq_bsid: u32,
    pub refs_list: ReferenceList,
    pub idxs_list: IndexList,
    #[serde(rename = "outputWidth")]
    pub output_width: u32,
    #[serde(rename = "outputHeight")]
    pub output_height: u32,
    /// Number of columns in the grid, 1 or more
    pub columns: u32,
    /// Number of rows in the grid, 1 or more
    pub rows: u32,
}

/// One overlay image placement.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IovlOffset {
    /// Offset of the image top-left corner from the canvas top-left corner.
    pub horizontal: i32,
    pub vertical: i32,
}

/// Image overlay derivation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Iovl {
    pub uniq_bsid: u32,
    pub refs_list: ReferenceList,
    pub idxs_list: IndexList,
    /// Canvas fill in R, G, B, A order; opacity 0 (transparent) to 65535
    #[serde(rename = "canvasFillValue", default)]
    pub canvas_fill_value: Vec<u16>,
    #[serde(rename = "outputWidth")]
    pub output_width: u32,
    #[serde(rename = "outputHeight")]
    pub output_height: u32,
    /// One offset per image in idxs_list
    pub offsets: Vec<IovlOffset>,
}

/// Derived images of one content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Derived {
    #[serde(default)]
    pub irots: Vec<Irot>,
    #[serde(default)]
    pub imirs: Vec<Imir>,
    #[serde(default)]
    pub rlocs: Vec<Rloc>,
    #[serde(default)]
    pub claps: Vec<Clap>,
    #[serde(default)]
    pub prederiveds: Vec<PreDerived>,
    #[serde(default)]
    pub grids: Vec<Grid>,
    #[serde(default)]
    pub iovls: Vec<Iovl>,
}

/// Properties associated with already-written images (no derived items).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Property {
    #[serde(default)]
    pub irots: Vec<Irot>,
    #[serde(default)]
    pub imirs: Vec<Imir>,
    #[serde(default)]
    pub rlocs: Vec<Rloc>,
    #[serde(default)]
    pub claps: Vec<Clap>,
}

/// Multi-layer image items.
#[derive(Debug, Clone, Deserialize)]
pub struct Layer {
    pub uniq_bsid: u32,
    /// uniq_bsid of the base context of this layer
    #[serde(default)]
    pub base_refr: u32,
    pub file_path: PathBuf,
    #[serde(default = "default_pict")]
    pub hdlr_type: String,
    #[serde(default = "default_lhv1")]
    pub code_type: String,
    #[serde(default)]
    pub hidden: bool,
    /// Target output layer set written as a 'tols' property
    #[serde(rename = "tols_value", default)]
    pub target_output_layer: u32,
    /// Layer selection written as an 'lsel' property; absent = no selection
    #[serde(rename = "lsel_value", default)]
    pub layer_selection: Option<i32>,
}

fn default_lhv1() -> String {
    "lhv1".into()
}

/// Identify a track or image item inside an entity group.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AltrIndexPair {
    /// uniq_bsid of the context
    pub uniq_bsid: u32,
    /// 1-based image index, or 0 when referring to the context's track
    pub item_indx: u32,
}

/// Alternative ('altr') entity groupings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Altr {
    #[serde(default)]
    pub idxs_lists: Vec<Vec<AltrIndexPair>>,
}

/// Entity grouping configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Egroups {
    #[serde(default)]
    pub altr: Altr,
}

/// One content: a master plus everything that refers to it.
#[derive(Debug, Clone, Deserialize)]
pub struct Content {
    pub master: Master,
    #[serde(default)]
    pub thumbs: Vec<Thumbs>,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    #[serde(default)]
    pub auxiliary: Vec<Auxiliary>,
    #[serde(default)]
    pub derived: Derived,
    #[serde(default)]
    pub property: Property,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

/// Writer main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    pub general: General,
    /// Content configuration, 1 or more
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default)]
    pub egroups: Egroups,
}

impl Configuration {
    /// Load the configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| Error::FileIo(path.to_path_buf(), e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ConfigInvalid(e.to_string()))
    }

    /// Shape-level validation; reference resolution happens while writing.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::ConfigInvalid("no content declared".into()));
        }
        if self.general.brands.major.len() != 4 {
            return Err(Error::ConfigInvalid("major brand is not a 4cc".into()));
        }
        if self.general.prim_refr.is_some() != self.general.prim_indx.is_some() {
            return Err(Error::ConfigInvalid(
                "prim_refr and prim_indx must be given together".into(),
            ));
        }
        for content in &self.content {
            let master = &content.master;
            match master.encp_type.as_str() {
                "meta" | "trak" => {}
                other => {
                    return Err(Error::ConfigInvalid(format!(
                        "unknown encapsulation type '{other}'"
                    )))
                }
            }
            if master.encp_type == "trak" && master.disp_rate == 0 {
                return Err(Error::ConfigInvalid(
                    "track content requires a nonzero disp_rate".into(),
                ));
            }
            for thumbs in &content.thumbs {
                if thumbs.sync_rate != 0 && !thumbs.sync_idxs.is_empty() {
                    return Err(Error::ConfigInvalid(
                        "thumbs must use either sync_rate or sync_idxs, not both".into(),
                    ));
                }
            }
            for metadata in &content.metadata {
                match metadata.hdlr_type.as_str() {
                    "exif" | "xml1" => {}
                    other => {
                        return Err(Error::ConfigInvalid(format!(
                            "unknown metadata handler '{other}'"
                        )))
                    }
                }
            }
            for irot in content.derived.irots.iter().chain(&content.property.irots) {
                if irot.angle % 90 != 0 || irot.angle > 270 {
                    return Err(Error::ConfigInvalid(format!(
                        "irot angle {} not in {{0, 90, 180, 270}}",
                        irot.angle
                    )));
                }
                validate_ref_shape(&irot.refs_list, &irot.idxs_list, "irot")?;
            }
            for imir in content.derived.imirs.iter().chain(&content.property.imirs) {
                validate_ref_shape(&imir.refs_list, &imir.idxs_list, "imir")?;
            }
            for rloc in content.derived.rlocs.iter().chain(&content.property.rlocs) {
                validate_ref_shape(&rloc.refs_list, &rloc.idxs_list, "rloc")?;
            }
            for clap in content.derived.claps.iter().chain(&content.property.claps) {
                if clap.clap_width_d == 0
                    || clap.clap_height_d == 0
                    || clap.horiz_off_d == 0
                    || clap.vert_off_d == 0
                {
                    return Err(Error::ConfigInvalid(
                        "clap denominators must be nonzero".into(),
                    ));
                }
                validate_ref_shape(&clap.refs_list, &clap.idxs_list, "clap")?;
            }
            for grid in &content.derived.grids {
                if grid.rows < 1 || grid.columns < 1 {
                    return Err(Error::ConfigInvalid(
                        "grid rows and columns must be 1 or more".into(),
                    ));
                }
                if grid.rows > 256 || grid.columns > 256 {
                    return Err(Error::ConfigInvalid(
                        "grid rows and columns must fit an 8-bit minus-one field".into(),
                    ));
                }
                validate_ref_shape(&grid.refs_list, &grid.idxs_list, "grid")?;
                let cells: usize = grid.idxs_list.iter().map(Vec::len).sum();
                if cells != (grid.rows * grid.columns) as usize {
                    return Err(Error::ConfigInvalid(format!(
                        "grid cites {cells} images for a {}x{} grid",
                        grid.rows, grid.columns
                    )));
                }
            }
            for iovl in &content.derived.iovls {
                validate_ref_shape(&iovl.refs_list, &iovl.idxs_list, "iovl")?;
                let cited: usize = iovl.idxs_list.iter().map(Vec::len).sum();
                if iovl.offsets.len() != cited {
                    return Err(Error::ConfigInvalid(format!(
                        "iovl has {} offsets for {cited} referenced images",
                        iovl.offsets.len()
                    )));
                }
                if !(iovl.canvas_fill_value.is_empty() || iovl.canvas_fill_value.len() == 4) {
                    return Err(Error::ConfigInvalid(
                        "iovl canvasFillValue needs exactly four channel values".into(),
                    ));
                }
            }
            for prederived in &content.derived.prederiveds {
                validate_ref_shape(&prederived.pre_refs_list, &prederived.pre_idxs_list, "pre-derived")?;
                validate_ref_shape(
                    &prederived.base_refs_list,
                    &prederived.base_idxs_list,
                    "pre-derived base",
                )?;
            }
            for auxiliary in &content.auxiliary {
                validate_ref_shape(&auxiliary.refs_list, &auxiliary.idxs_list, "auxiliary")?;
            }
        }
        for group in &self.egroups.altr.idxs_lists {
            if group.is_empty() {
                return Err(Error::ConfigInvalid("empty altr entity group".into()));
            }
        }
        Ok(())
    }
}

fn validate_ref_shape(refs_list: &[u32], idxs_list: &IndexList, what: &str) -> Result<()> {
    if refs_list.is_empty() {
        return Err(Error::ConfigInvalid(format!("{what} has an empty refs_list")));
    }
    if refs_list.len() != idxs_list.len() {
        return Err(Error::ConfigInvalid(format!(
            "{what} has {} refs but {} index lists",
            refs_list.len(),
            idxs_list.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> String {
        r#"{
            "general": {
                "output_file": "out.heic",
                "brands": { "major": "heic", "other": ["mif1"] },
                "prim_refr": 1,
                "prim_indx": 1
            },
            "content": [ {
                "master": {
                    "uniq_bsid": 1,
                    "file_path": "in.265",
                    "code_type": "hvc1",
                    "disp_xdim": 1920,
                    "disp_ydim": 1080
                }
            } ]
        }"#
        .into()
    }

    #[test]
    fn minimal_configuration_parses_with_defaults() {
        let config = Configuration::from_json(&minimal_json()).unwrap();
        config.validate().unwrap();
        let master = &config.content[0].master;
        assert_eq!(master.hdlr_type, "pict");
        assert_eq!(master.encp_type, "meta");
        assert_eq!(master.tick_rate, 90000);
        assert!(master.write_alternates);
        assert!(!master.hidden);
    }

    #[test]
    fn grid_cell_count_must_match_geometry() {
        let mut config = Configuration::from_json(&minimal_json()).unwrap();
        config.content[0].derived.grids.push(Grid {
            uniq_bsid: 3,
            refs_list: vec![1],
            idxs_list: vec![vec![1, 2, 3]],
            output_width: 100,
            output_height: 100,
            columns: 2,
            rows: 2,
        });
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn irot_angle_is_checked() {
        let mut config = Configuration::from_json(&minimal_json()).unwrap();
        config.content[0].derived.irots.push(Irot {
            uniq_bsid: 4,
            essential: true,
            refs_list: vec![1],
            idxs_list: vec![vec![1]],
            angle: 45,
        });
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn overlay_offsets_must_match_citations() {
        let mut config = Configuration::from_json(&minimal_json()).unwrap();
        config.content[0].derived.iovls.push(Iovl {
            uniq_bsid: 5,
            refs_list: vec![1],
            idxs_list: vec![vec![1, 1]],
            canvas_fill_value: vec![0, 0, 0, 65535],
            output_width: 64,
            output_height: 64,
            offsets: vec![IovlOffset {
                horizontal: 0,
                vertical: 0,
            }],
        });
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn prim_refr_requires_prim_indx() {
        let mut config = Configuration::from_json(&minimal_json()).unwrap();
        config.general.prim_indx = None;
        assert!(config.validate().is_err());
    }
}
