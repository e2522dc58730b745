//! VVC (ISO 23090-3) NAL unit handling and the `vvcC` configuration record.
//! Record layout per ISO 14496-15 § 11.2.4
//!
//! The SPS walk covers the subset needed to fill the record:
//! profile/tier/level, chroma format, bit depth and the maximum picture
//! dimensions. Streams using general constraint info or subpictures are
//! declined.

use crate::bitstream::{byte_stream_to_rbsp, BitStream};
use crate::codec::nal::{AccessUnitBuilder, ParsedBitstream};
use crate::codec::{add_nal_unit, DecoderConfig, NalArray};
use crate::{Error, Result};

pub const NAL_OPI: u8 = 12;
pub const NAL_DCI: u8 = 13;
pub const NAL_VPS: u8 = 14;
pub const NAL_SPS: u8 = 15;
pub const NAL_PPS: u8 = 16;
pub const NAL_PREFIX_APS: u8 = 17;
pub const NAL_PH: u8 = 19;
pub const NAL_AUD: u8 = 20;

/// NAL unit type from the second byte of a two-byte VVC NAL header.
pub fn nal_unit_type(nal_unit: &[u8]) -> Result<u8> {
    let second = nal_unit.get(1).ok_or(Error::EndOfStream)?;
    Ok((second >> 3) & 0x1f)
}

fn is_vcl(nal_type: u8) -> bool {
    nal_type <= 11
}

/// IDR_W_RADL, IDR_N_LP, CRA and GDR pictures.
fn is_irap(nal_type: u8) -> bool {
    (7..=10).contains(&nal_type)
}

/// `sh_picture_header_in_slice_header_flag` is the first slice-header bit.
fn carries_picture_header(nal_unit: &[u8]) -> bool {
    nal_unit.get(2).is_some_and(|b| b & 0x80 != 0)
}

/// Profile, tier, level as carried natively in the record.
#[derive(Debug, Clone, Default)]
pub struct VvcPtlRecord {
    pub general_profile_idc: u8,
    pub general_tier_flag: bool,
    pub general_level_idc: u8,
    pub frame_only_constraint: bool,
    pub multilayer_enabled: bool,
    /// Indexed by sub-layer, highest first as serialized.
    pub sublayer_level_present: Vec<bool>,
    pub sublayer_level_idc: Vec<u8>,
    pub sub_profile_idc: Vec<u32>,
}

impl VvcPtlRecord {
    /// Constraint info is always written as a single byte: the
    /// `gci_present_flag` cleared plus five padding bits.
    fn write(&self, w: &mut BitStream, num_sublayers: u8) -> Result<()> {
        w.write_bits(0, 2); // reserved
        w.write_bits(1, 6); // num_bytes_constraint_info
        w.write_bits(u64::from(self.general_profile_idc), 7);
        w.write_bits(u64::from(self.general_tier_flag), 1);
        w.write_bits(u64::from(self.general_level_idc), 8);
        w.write_bits(u64::from(self.frame_only_constraint), 1);
        w.write_bits(u64::from(self.multilayer_enabled), 1);
        w.write_bits(0, 1); // gci_present_flag
        while !w.is_byte_aligned() {
            w.write_bits(0, 1); // gci_alignment_zero_bit
        }
        for i in (0..num_sublayers.saturating_sub(1)).rev() {
            let present = self
                .sublayer_level_present
                .get(usize::from(i))
                .copied()
                .unwrap_or(false);
            w.write_bits(u64::from(present), 1);
        }
        if num_sublayers > 1 {
            for _ in num_sublayers..=8 {
                w.write_bits(0, 1);
            }
        }
        for i in (0..num_sublayers.saturating_sub(1)).rev() {
            if self
                .sublayer_level_present
                .get(usize::from(i))
                .copied()
                .unwrap_or(false)
            {
                let idc = self.sublayer_level_idc.get(usize::from(i)).copied().unwrap_or(0);
                w.write_bits(u64::from(idc), 8);
            }
        }
        w.write_bits(self.sub_profile_idc.len() as u64, 8);
        for &idc in &self.sub_profile_idc {
            w.write_bits(u64::from(idc), 32);
        }
        Ok(())
    }

    fn parse(r: &mut BitStream, num_sublayers: u8) -> Result<Self> {
        let mut ptl = Self::default();
        r.read_bits(2)?; // reserved
        let num_bytes_constraint_info = r.read_bits(6)?;
        if num_bytes_constraint_info == 0 {
            return Err(Error::parse(r.position(), "vvcC constraint info length is zero"));
        }
        ptl.general_profile_idc = r.read_bits(7)? as u8;
        ptl.general_tier_flag = r.read_bits(1)? != 0;
        ptl.general_level_idc = r.read_bits(8)? as u8;
        ptl.frame_only_constraint = r.read_bits(1)? != 0;
        ptl.multilayer_enabled = r.read_bits(1)? != 0;
        // Skip the whole constraint-info span, gci_present_flag included.
        let mut constraint_bits = num_bytes_constraint_info * 8 - 2;
        while constraint_bits > 0 {
            let step = constraint_bits.min(32);
            r.read_bits(step)?;
            constraint_bits -= step;
        }
        ptl.sublayer_level_present = vec![false; usize::from(num_sublayers.saturating_sub(1))];
        for i in (0..num_sublayers.saturating_sub(1)).rev() {
            ptl.sublayer_level_present[usize::from(i)] = r.read_bits(1)? != 0;
        }
        if num_sublayers > 1 {
            for _ in num_sublayers..=8 {
                r.read_bits(1)?;
            }
        }
        ptl.sublayer_level_idc = vec![0; usize::from(num_sublayers.saturating_sub(1))];
        for i in (0..num_sublayers.saturating_sub(1)).rev() {
            if ptl.sublayer_level_present[usize::from(i)] {
                ptl.sublayer_level_idc[usize::from(i)] = r.read_bits(8)? as u8;
            }
        }
        let num_sub_profiles = r.read_bits(8)?;
        for _ in 0..num_sub_profiles {
            ptl.sub_profile_idc.push(r.read_bits(32)?);
        }
        Ok(ptl)
    }
}

#[derive(Debug, Clone)]
pub struct VvcDecoderConfigurationRecord {
    pub length_size_minus_one: u8,
    pub ptl_present: bool,
    pub ols_idx: u16,
    pub num_sublayers: u8,
    pub constant_frame_rate: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_minus8: u8,
    pub native_ptl: VvcPtlRecord,
    pub max_picture_width: u16,
    pub max_picture_height: u16,
    pub avg_frame_rate: u16,
    nal_arrays: Vec<NalArray>,
}

impl Default for VvcDecoderConfigurationRecord {
    fn default() -> Self {
        Self {
            length_size_minus_one: 3,
            ptl_present: false,
            ols_idx: 0,
            num_sublayers: 1,
            constant_frame_rate: 0,
            chroma_format_idc: 0,
            bit_depth_minus8: 0,
            native_ptl: VvcPtlRecord::default(),
            max_picture_width: 0,
            max_picture_height: 0,
            avg_frame_rate: 0,
            nal_arrays: Vec::new(),
        }
    }
}

impl VvcDecoderConfigurationRecord {
    pub fn config_from_sps(&mut self, sps_byte_stream: &[u8]) -> Result<()> {
        let rbsp = byte_stream_to_rbsp(sps_byte_stream);
        let mut r = BitStream::from_vec(rbsp);

        // NAL unit header
        r.read_bits(16)?;

        r.read_bits(4)?; // sps_seq_parameter_set_id
        r.read_bits(4)?; // sps_video_parameter_set_id
        self.num_sublayers = r.read_bits(3)? as u8 + 1; // sps_max_sublayers_minus1
        self.chroma_format_idc = r.read_bits(2)? as u8;
        r.read_bits(2)?; // sps_log2_ctu_size_minus5
        self.ptl_present = r.read_bits(1)? != 0; // sps_ptl_dpb_hrd_params_present_flag
        if self.ptl_present {
            self.native_ptl = parse_sps_profile_tier_level(&mut r, self.num_sublayers)?;
        }
        r.read_bits(1)?; // sps_gdr_enabled_flag
        if r.read_bits(1)? != 0 {
            // sps_ref_pic_resampling_enabled_flag
            r.read_bits(1)?; // sps_res_change_in_clvs_allowed_flag
        }
        self.max_picture_width = r.read_exp_golomb()? as u16;
        self.max_picture_height = r.read_exp_golomb()? as u16;
        if r.read_bits(1)? != 0 {
            // sps_conformance_window_flag
            for _ in 0..4 {
                r.read_exp_golomb()?;
            }
        }
        if r.read_bits(1)? != 0 {
            // sps_subpic_info_present_flag
            return Err(Error::parse(r.position(), "VVC subpicture info is not supported"));
        }
        self.bit_depth_minus8 = r.read_exp_golomb()? as u8;

        self.length_size_minus_one = 3;
        self.avg_frame_rate = 0; // unspecified
        self.constant_frame_rate = 0;
        self.ols_idx = 0;
        Ok(())
    }

    pub fn add_nal_unit(&mut self, nal_unit: &[u8], nal_unit_type: u8, array_completeness: bool) {
        add_nal_unit(
            &mut self.nal_arrays,
            nal_unit_type,
            array_completeness,
            nal_unit,
        );
    }

    pub fn nal_arrays(&self) -> &[NalArray] {
        &self.nal_arrays
    }

    pub fn write_record(&self, w: &mut BitStream) -> Result<()> {
        w.write_bits(0x1f, 5); // reserved = '11111'b
        w.write_bits(u64::from(self.length_size_minus_one), 2);
        w.write_bits(u64::from(self.ptl_present), 1);
        if self.ptl_present {
            w.write_bits(u64::from(self.ols_idx), 9);
            w.write_bits(u64::from(self.num_sublayers), 3);
            w.write_bits(u64::from(self.constant_frame_rate), 2);
            w.write_bits(u64::from(self.chroma_format_idc), 2);
            w.write_bits(u64::from(self.bit_depth_minus8), 3);
            w.write_bits(0x1f, 5); // reserved = '11111'b
            self.native_ptl.write(w, self.num_sublayers)?;
            w.write_bits(u64::from(self.max_picture_width), 16);
            w.write_bits(u64::from(self.max_picture_height), 16);
            w.write_bits(u64::from(self.avg_frame_rate), 16);
        }
        w.write_bits(self.nal_arrays.len() as u64, 8);
        for array in &self.nal_arrays {
            w.write_bits(u64::from(array.array_completeness), 1);
            w.write_bits(0, 2); // reserved
            w.write_bits(u64::from(array.nal_unit_type), 5);
            if array.nal_unit_type != NAL_DCI && array.nal_unit_type != NAL_OPI {
                w.write_bits(array.nal_units.len() as u64, 16);
            }
            for nal in &array.nal_units {
                w.write_bits(nal.len() as u64, 16);
                w.write_bytes(nal);
            }
        }
        Ok(())
    }

    pub fn parse_record(r: &mut BitStream) -> Result<Self> {
        let mut record = Self::default();
        r.read_bits(5)?; // reserved
        record.length_size_minus_one = r.read_bits(2)? as u8;
        record.ptl_present = r.read_bits(1)? != 0;
        if record.ptl_present {
            record.ols_idx = r.read_bits(9)? as u16;
            record.num_sublayers = r.read_bits(3)? as u8;
            record.constant_frame_rate = r.read_bits(2)? as u8;
            record.chroma_format_idc = r.read_bits(2)? as u8;
            record.bit_depth_minus8 = r.read_bits(3)? as u8;
            r.read_bits(5)?; // reserved
            record.native_ptl = VvcPtlRecord::parse(r, record.num_sublayers)?;
            record.max_picture_width = r.read_bits(16)? as u16;
            record.max_picture_height = r.read_bits(16)? as u16;
            record.avg_frame_rate = r.read_bits(16)? as u16;
        }
        let num_of_arrays = r.read_bits(8)?;
        for _ in 0..num_of_arrays {
            let array_completeness = r.read_bits(1)? != 0;
            r.read_bits(2)?; // reserved
            let nal_unit_type = r.read_bits(5)? as u8;
            let num_nalus = if nal_unit_type != NAL_DCI && nal_unit_type != NAL_OPI {
                r.read_bits(16)?
            } else {
                1
            };
            for _ in 0..num_nalus {
                let size = r.read_bits(16)?;
                let nal = r.read_bytes(u64::from(size))?;
                record.add_nal_unit(&nal, nal_unit_type, array_completeness);
            }
        }
        Ok(record)
    }
}

/// In-SPS profile_tier_level with profileTierPresentFlag = 1.
/// See ISO 23090-3 § 7.3.3.1
fn parse_sps_profile_tier_level(r: &mut BitStream, num_sublayers: u8) -> Result<VvcPtlRecord> {
    let mut ptl = VvcPtlRecord {
        general_profile_idc: r.read_bits(7)? as u8,
        general_tier_flag: r.read_bits(1)? != 0,
        general_level_idc: r.read_bits(8)? as u8,
        frame_only_constraint: r.read_bits(1)? != 0,
        multilayer_enabled: r.read_bits(1)? != 0,
        ..VvcPtlRecord::default()
    };
    if r.read_bits(1)? != 0 {
        // gci_present_flag
        return Err(Error::parse(
            r.position(),
            "VVC general constraint info is not supported",
        ));
    }
    while !r.is_byte_aligned() {
        r.read_bits(1)?; // gci_alignment_zero_bit
    }
    ptl.sublayer_level_present = vec![false; usize::from(num_sublayers.saturating_sub(1))];
    for i in (0..num_sublayers.saturating_sub(1)).rev() {
        ptl.sublayer_level_present[usize::from(i)] = r.read_bits(1)? != 0;
    }
    while !r.is_byte_aligned() {
        r.read_bits(1)?; // ptl_alignment_zero_bit
    }
    ptl.sublayer_level_idc = vec![0; usize::from(num_sublayers.saturating_sub(1))];
    for i in (0..num_sublayers.saturating_sub(1)).rev() {
        if ptl.sublayer_level_present[usize::from(i)] {
            ptl.sublayer_level_idc[usize::from(i)] = r.read_bits(8)? as u8;
        }
    }
    let num_sub_profiles = r.read_bits(8)?;
    for _ in 0..num_sub_profiles {
        ptl.sub_profile_idc.push(r.read_bits(32)?);
    }
    Ok(ptl)
}

/// Build the configuration record and access units for a VVC stream.
pub(crate) fn ingest(nal_units: &[&[u8]]) -> Result<ParsedBitstream> {
    let mut record = VvcDecoderConfigurationRecord::default();
    let mut sps_seen = false;
    let mut builder = AccessUnitBuilder::new();

    for &nal_unit in nal_units {
        let nal_type = nal_unit_type(nal_unit)?;
        match nal_type {
            NAL_VPS | NAL_SPS | NAL_PPS | NAL_PREFIX_APS | NAL_DCI | NAL_OPI => {
                if nal_type == NAL_SPS && !sps_seen {
                    record.config_from_sps(nal_unit)?;
                    sps_seen = true;
                }
                record.add_nal_unit(nal_unit, nal_type, true);
            }
            NAL_AUD | NAL_PH => builder.push(nal_unit, true, false),
            _ if is_vcl(nal_type) => {
                builder.push(nal_unit, carries_picture_header(nal_unit), is_irap(nal_type));
            }
            _ => builder.push(nal_unit, false, false),
        }
    }

    if !sps_seen {
        return Err(Error::malformed("no SPS in VVC bitstream"));
    }
    let samples = builder.into_samples();
    if samples.is_empty() {
        return Err(Error::malformed("no coded pictures in VVC bitstream"));
    }
    Ok(ParsedBitstream {
        config: DecoderConfig::Vvc(record),
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hevc::testing::{rbsp_to_byte_stream, write_ue};

    fn synth_sps(width: u32, height: u32) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_bits(0, 1); // forbidden_zero_bit
        bs.write_bits(0, 1); // nuh_reserved_zero_bit
        bs.write_bits(0, 6); // nuh_layer_id
        bs.write_bits(u64::from(NAL_SPS), 5);
        bs.write_bits(1, 3); // nuh_temporal_id_plus1
        bs.write_bits(0, 4); // sps_seq_parameter_set_id
        bs.write_bits(0, 4); // sps_video_parameter_set_id
        bs.write_bits(0, 3); // sps_max_sublayers_minus1
        bs.write_bits(1, 2); // sps_chroma_format_idc
        bs.write_bits(2, 2); // sps_log2_ctu_size_minus5
        bs.write_bits(1, 1); // sps_ptl_dpb_hrd_params_present_flag
        bs.write_bits(1, 7); // general_profile_idc
        bs.write_bits(0, 1); // general_tier_flag
        bs.write_bits(51, 8); // general_level_idc
        bs.write_bits(1, 1); // ptl_frame_only_constraint_flag
        bs.write_bits(0, 1); // ptl_multilayer_enabled_flag
        bs.write_bits(0, 1); // gci_present_flag
        while !bs.is_byte_aligned() {
            bs.write_bits(0, 1);
        }
        // num_sublayers == 1: no sublayer flags, straight to sub profiles
        bs.write_bits(0, 8); // ptl_num_sub_profiles
        bs.write_bits(0, 1); // sps_gdr_enabled_flag
        bs.write_bits(0, 1); // sps_ref_pic_resampling_enabled_flag
        write_ue(&mut bs, width);
        write_ue(&mut bs, height);
        bs.write_bits(0, 1); // sps_conformance_window_flag
        bs.write_bits(0, 1); // sps_subpic_info_present_flag
        write_ue(&mut bs, 2); // sps_bitdepth_minus8
        bs.write_bits(1, 1); // rbsp stop
        while !bs.is_byte_aligned() {
            bs.write_bits(0, 1);
        }
        rbsp_to_byte_stream(&bs.into_storage())
    }

    #[test]
    fn sps_subset_fills_the_record() {
        let sps = synth_sps(1280, 720);
        let mut record = VvcDecoderConfigurationRecord::default();
        record.config_from_sps(&sps).unwrap();
        assert!(record.ptl_present);
        assert_eq!(record.max_picture_width, 1280);
        assert_eq!(record.max_picture_height, 720);
        assert_eq!(record.native_ptl.general_profile_idc, 1);
        assert_eq!(record.native_ptl.general_level_idc, 51);
        assert_eq!(record.bit_depth_minus8, 2);
        assert_eq!(record.chroma_format_idc, 1);
    }

    #[test]
    fn record_round_trips() {
        let sps = synth_sps(320, 240);
        let mut record = VvcDecoderConfigurationRecord::default();
        record.config_from_sps(&sps).unwrap();
        record.add_nal_unit(&sps, NAL_SPS, true);

        let mut w = BitStream::new();
        record.write_record(&mut w).unwrap();
        w.reset();
        let reparsed = VvcDecoderConfigurationRecord::parse_record(&mut w).unwrap();
        assert_eq!(reparsed.max_picture_width, 320);
        assert_eq!(reparsed.native_ptl.general_level_idc, 51);
        assert_eq!(reparsed.nal_arrays().len(), 1);
        assert_eq!(reparsed.nal_arrays()[0].nal_units[0], record.nal_arrays()[0].nal_units[0]);
    }
}
