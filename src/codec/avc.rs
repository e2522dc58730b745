//! AVC (ISO 14496-10) NAL unit handling and the `avcC` configuration record.
//! Record layout per ISO 14496-15 § 5.3.3.1

use crate::bitstream::{byte_stream_to_rbsp, BitStream};
use crate::codec::nal::{AccessUnitBuilder, ParsedBitstream};
use crate::codec::{add_nal_unit, DecoderConfig, NalArray};
use crate::{Error, Result};

pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;
pub const NAL_SPS_EXT: u8 = 13;

/// NAL unit type from a one-byte AVC NAL header.
pub fn nal_unit_type(nal_unit: &[u8]) -> Result<u8> {
    let first = nal_unit.first().ok_or(Error::EndOfStream)?;
    Ok(first & 0x1f)
}

fn is_vcl(nal_type: u8) -> bool {
    (1..=5).contains(&nal_type)
}

/// `first_mb_in_slice == 0` starts a new picture; as an ue(v) code, value
/// zero is a single set bit. See ISO 14496-10 § 7.3.3
fn is_first_slice(nal_unit: &[u8]) -> bool {
    nal_unit.get(1).is_some_and(|b| b & 0x80 != 0)
}

/// The SPS fields this writer needs. See ISO 14496-10 § 7.3.2.1.1
#[derive(Debug, Default, Clone)]
pub struct SpsConfigValues {
    pub profile_idc: u8,
    pub profile_compatibility: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,
}

/// Parse an SPS RBSP positioned after the one-byte NAL header.
pub fn parse_sps(r: &mut BitStream) -> Result<SpsConfigValues> {
    let mut sps = SpsConfigValues {
        profile_idc: r.read_bits(8)? as u8,
        profile_compatibility: r.read_bits(8)? as u8,
        level_idc: r.read_bits(8)? as u8,
        chroma_format_idc: 1,
        ..SpsConfigValues::default()
    };
    r.read_exp_golomb()?; // seq_parameter_set_id
    if matches!(
        sps.profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        sps.chroma_format_idc = r.read_exp_golomb()?;
        if sps.chroma_format_idc == 3 {
            r.read_bits(1)?; // separate_colour_plane_flag
        }
        sps.bit_depth_luma_minus8 = r.read_exp_golomb()?;
        sps.bit_depth_chroma_minus8 = r.read_exp_golomb()?;
        r.read_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if r.read_bits(1)? != 0 {
            return Err(Error::parse(
                r.position(),
                "SPS scaling matrices are not supported",
            ));
        }
    }
    r.read_exp_golomb()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = r.read_exp_golomb()?;
    if pic_order_cnt_type == 0 {
        r.read_exp_golomb()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        r.read_bits(1)?; // delta_pic_order_always_zero_flag
        r.read_signed_exp_golomb()?; // offset_for_non_ref_pic
        r.read_signed_exp_golomb()?; // offset_for_top_to_bottom_field
        let num_ref_frames_in_pic_order_cnt_cycle = r.read_exp_golomb()?;
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            r.read_signed_exp_golomb()?; // offset_for_ref_frame
        }
    }
    r.read_exp_golomb()?; // max_num_ref_frames
    r.read_bits(1)?; // gaps_in_frame_num_value_allowed_flag
    sps.pic_width_in_mbs_minus1 = r.read_exp_golomb()?;
    sps.pic_height_in_map_units_minus1 = r.read_exp_golomb()?;
    sps.frame_mbs_only_flag = r.read_bits(1)? != 0;
    if !sps.frame_mbs_only_flag {
        r.read_bits(1)?; // mb_adaptive_frame_field_flag
    }
    r.read_bits(1)?; // direct_8x8_inference_flag
    if r.read_bits(1)? != 0 {
        // frame_cropping_flag
        sps.frame_crop_left_offset = r.read_exp_golomb()?;
        sps.frame_crop_right_offset = r.read_exp_golomb()?;
        sps.frame_crop_top_offset = r.read_exp_golomb()?;
        sps.frame_crop_bottom_offset = r.read_exp_golomb()?;
    }
    // vui_parameters_present_flag and beyond are not needed.
    Ok(sps)
}

#[derive(Debug, Clone)]
pub struct AvcDecoderConfigurationRecord {
    pub configuration_version: u8,
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    pub length_size_minus_one: u8,
    pub chroma_format: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub pic_width: u16,
    pub pic_height: u16,
    nal_arrays: Vec<NalArray>,
}

impl Default for AvcDecoderConfigurationRecord {
    fn default() -> Self {
        Self {
            configuration_version: 1,
            avc_profile_indication: 66,
            profile_compatibility: 128,
            avc_level_indication: 30,
            length_size_minus_one: 3,
            chroma_format: 0,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            pic_width: 0,
            pic_height: 0,
            nal_arrays: Vec::new(),
        }
    }
}

impl AvcDecoderConfigurationRecord {
    /// High/High-10/High-4:2:2/High-4:4:4 profiles carry the chroma and
    /// bit-depth trailer with SPS extension NAL units.
    fn has_extended_fields(&self) -> bool {
        matches!(self.avc_profile_indication, 100 | 110 | 122 | 144)
    }

    pub fn config_from_sps(&mut self, sps_byte_stream: &[u8]) -> Result<()> {
        let rbsp = byte_stream_to_rbsp(sps_byte_stream);
        let mut r = BitStream::from_vec(rbsp);
        r.read_u8()?; // NAL header byte
        let sps = parse_sps(&mut r)?;

        self.avc_profile_indication = sps.profile_idc;
        self.profile_compatibility = sps.profile_compatibility;
        self.avc_level_indication = sps.level_idc;
        self.chroma_format = sps.chroma_format_idc as u8;
        self.bit_depth_luma_minus8 = sps.bit_depth_luma_minus8 as u8;
        self.bit_depth_chroma_minus8 = sps.bit_depth_chroma_minus8 as u8;
        self.length_size_minus_one = 3;

        self.pic_width = ((sps.pic_width_in_mbs_minus1 + 1) * 16
            - (sps.frame_crop_left_offset + sps.frame_crop_right_offset) * 2)
            as u16;
        let field_factor = if sps.frame_mbs_only_flag { 1 } else { 2 };
        self.pic_height = (field_factor * (sps.pic_height_in_map_units_minus1 + 1) * 16
            - (sps.frame_crop_top_offset + sps.frame_crop_bottom_offset) * 2)
            as u16;
        Ok(())
    }

    pub fn add_nal_unit(&mut self, nal_unit: &[u8], nal_unit_type: u8) {
        add_nal_unit(&mut self.nal_arrays, nal_unit_type, true, nal_unit);
    }

    pub fn nal_arrays(&self) -> &[NalArray] {
        &self.nal_arrays
    }

    fn nal_units_of(&self, nal_unit_type: u8) -> &[Vec<u8>] {
        self.nal_arrays
            .iter()
            .find(|a| a.nal_unit_type == nal_unit_type)
            .map(|a| a.nal_units.as_slice())
            .unwrap_or(&[])
    }

    fn write_nal_list(w: &mut BitStream, nal_units: &[Vec<u8>]) {
        for nal in nal_units {
            w.write_bits(nal.len() as u64, 16);
            w.write_bytes(nal);
        }
    }

    pub fn write_record(&self, w: &mut BitStream) -> Result<()> {
        w.write_bits(u64::from(self.configuration_version), 8);
        w.write_bits(u64::from(self.avc_profile_indication), 8);
        w.write_bits(u64::from(self.profile_compatibility), 8);
        w.write_bits(u64::from(self.avc_level_indication), 8);
        w.write_bits(0x3f, 6); // reserved = '111111'b
        w.write_bits(u64::from(self.length_size_minus_one), 2);

        let sps_list = self.nal_units_of(NAL_SPS);
        w.write_bits(0x7, 3); // reserved = '111'b
        w.write_bits(sps_list.len() as u64, 5);
        Self::write_nal_list(w, sps_list);

        let pps_list = self.nal_units_of(NAL_PPS);
        w.write_bits(pps_list.len() as u64, 8);
        Self::write_nal_list(w, pps_list);

        if self.has_extended_fields() {
            w.write_bits(0x3f, 6); // reserved = '111111'b
            w.write_bits(u64::from(self.chroma_format), 2);
            w.write_bits(0x1f, 5); // reserved = '11111'b
            w.write_bits(u64::from(self.bit_depth_luma_minus8), 3);
            w.write_bits(0x1f, 5); // reserved = '11111'b
            w.write_bits(u64::from(self.bit_depth_chroma_minus8), 3);
            let sps_ext_list = self.nal_units_of(NAL_SPS_EXT);
            w.write_bits(sps_ext_list.len() as u64, 8);
            Self::write_nal_list(w, sps_ext_list);
        }
        Ok(())
    }

    pub fn parse_record(r: &mut BitStream) -> Result<Self> {
        let mut record = Self {
            configuration_version: r.read_bits(8)? as u8,
            avc_profile_indication: r.read_bits(8)? as u8,
            profile_compatibility: r.read_bits(8)? as u8,
            avc_level_indication: r.read_bits(8)? as u8,
            ..Self::default()
        };
        r.read_bits(6)?; // reserved
        record.length_size_minus_one = r.read_bits(2)? as u8;

        r.read_bits(3)?; // reserved
        let sps_count = r.read_bits(5)?;
        for _ in 0..sps_count {
            let size = r.read_bits(16)?;
            let nal = r.read_bytes(u64::from(size))?;
            record.add_nal_unit(&nal, NAL_SPS);
        }
        let pps_count = r.read_bits(8)?;
        for _ in 0..pps_count {
            let size = r.read_bits(16)?;
            let nal = r.read_bytes(u64::from(size))?;
            record.add_nal_unit(&nal, NAL_PPS);
        }
        if record.has_extended_fields() && r.num_bytes_left() > 0 {
            r.read_bits(6)?; // reserved
            record.chroma_format = r.read_bits(2)? as u8;
            r.read_bits(5)?; // reserved
            record.bit_depth_luma_minus8 = r.read_bits(3)? as u8;
            r.read_bits(5)?; // reserved
            record.bit_depth_chroma_minus8 = r.read_bits(3)? as u8;
            let sps_ext_count = r.read_bits(8)?;
            for _ in 0..sps_ext_count {
                let size = r.read_bits(16)?;
                let nal = r.read_bytes(u64::from(size))?;
                record.add_nal_unit(&nal, NAL_SPS_EXT);
            }
        }
        Ok(record)
    }
}

/// Build the configuration record and access units for an AVC stream.
pub(crate) fn ingest(nal_units: &[&[u8]]) -> Result<ParsedBitstream> {
    let mut record = AvcDecoderConfigurationRecord::default();
    let mut sps_seen = false;
    let mut builder = AccessUnitBuilder::new();

    for &nal_unit in nal_units {
        let nal_type = nal_unit_type(nal_unit)?;
        match nal_type {
            NAL_SPS | NAL_PPS | NAL_SPS_EXT => {
                if nal_type == NAL_SPS && !sps_seen {
                    record.config_from_sps(nal_unit)?;
                    sps_seen = true;
                }
                record.add_nal_unit(nal_unit, nal_type);
            }
            NAL_AUD => builder.push(nal_unit, true, false),
            _ if is_vcl(nal_type) => {
                builder.push(nal_unit, is_first_slice(nal_unit), nal_type == NAL_IDR);
            }
            _ => builder.push(nal_unit, false, false),
        }
    }

    if !sps_seen {
        return Err(Error::malformed("no SPS in AVC bitstream"));
    }
    let samples = builder.into_samples();
    if samples.is_empty() {
        return Err(Error::malformed("no coded pictures in AVC bitstream"));
    }
    Ok(ParsedBitstream {
        config: DecoderConfig::Avc(record),
        samples,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Synthetic AVC streams for tests.

    use super::*;
    use crate::codec::hevc::testing::{rbsp_to_byte_stream, write_ue};

    fn finish_rbsp(mut bs: BitStream) -> Vec<u8> {
        bs.write_bits(1, 1);
        while !bs.is_byte_aligned() {
            bs.write_bits(0, 1);
        }
        rbsp_to_byte_stream(&bs.into_storage())
    }

    /// A Baseline-profile SPS; dimensions must be multiples of 16.
    pub fn synth_sps(width: u32, height: u32) -> Vec<u8> {
        assert!(width % 16 == 0 && height % 16 == 0);
        let mut bs = BitStream::new();
        bs.write_bits(0x67, 8); // nal_ref_idc 3, type 7
        bs.write_bits(66, 8); // profile_idc = Baseline
        bs.write_bits(128, 8); // constraint flags
        bs.write_bits(30, 8); // level_idc = 3.0
        write_ue(&mut bs, 0); // seq_parameter_set_id
        write_ue(&mut bs, 0); // log2_max_frame_num_minus4
        write_ue(&mut bs, 0); // pic_order_cnt_type
        write_ue(&mut bs, 0); // log2_max_pic_order_cnt_lsb_minus4
        write_ue(&mut bs, 1); // max_num_ref_frames
        bs.write_bits(0, 1); // gaps_in_frame_num_value_allowed_flag
        write_ue(&mut bs, width / 16 - 1);
        write_ue(&mut bs, height / 16 - 1);
        bs.write_bits(1, 1); // frame_mbs_only_flag
        bs.write_bits(0, 1); // direct_8x8_inference_flag
        bs.write_bits(0, 1); // frame_cropping_flag
        bs.write_bits(0, 1); // vui_parameters_present_flag
        finish_rbsp(bs)
    }

    pub fn synth_pps() -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_bits(0x68, 8); // nal_ref_idc 3, type 8
        write_ue(&mut bs, 0); // pic_parameter_set_id
        write_ue(&mut bs, 0); // seq_parameter_set_id
        finish_rbsp(bs)
    }

    pub fn synth_idr_slice(payload_len: usize) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_bits(0x65, 8); // nal_ref_idc 3, type 5 (IDR)
        write_ue(&mut bs, 0); // first_mb_in_slice
        write_ue(&mut bs, 7); // slice_type
        let mut nal = finish_rbsp(bs);
        nal.resize(nal.len() + payload_len, 0x5a);
        nal
    }

    /// A complete stream with `pictures` IDR access units.
    pub fn synth_stream(width: u32, height: u32, pictures: usize) -> Vec<u8> {
        let mut units: Vec<Vec<u8>> = vec![synth_sps(width, height), synth_pps()];
        for i in 0..pictures {
            units.push(synth_idr_slice(8 + i));
        }
        let mut out = Vec::new();
        for nal in &units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::codec::nal::split_nal_units;

    #[test]
    fn sps_dimensions_are_derived_from_macroblocks() {
        let sps = synth_sps(320, 240);
        let mut record = AvcDecoderConfigurationRecord::default();
        record.config_from_sps(&sps).unwrap();
        assert_eq!(record.pic_width, 320);
        assert_eq!(record.pic_height, 240);
        assert_eq!(record.avc_profile_indication, 66);
        assert!(!record.has_extended_fields());
    }

    #[test]
    fn baseline_record_omits_the_high_profile_trailer() {
        let sps = synth_sps(64, 48);
        let mut record = AvcDecoderConfigurationRecord::default();
        record.config_from_sps(&sps).unwrap();
        record.add_nal_unit(&sps, NAL_SPS);
        record.add_nal_unit(&synth_pps(), NAL_PPS);

        let mut w = BitStream::new();
        record.write_record(&mut w).unwrap();
        let baseline_len = w.size();
        w.reset();
        let reparsed = AvcDecoderConfigurationRecord::parse_record(&mut w).unwrap();
        assert_eq!(reparsed.nal_units_of(NAL_SPS).len(), 1);
        assert_eq!(reparsed.nal_units_of(NAL_PPS).len(), 1);

        let mut high = record.clone();
        high.avc_profile_indication = 100;
        let mut w2 = BitStream::new();
        high.write_record(&mut w2).unwrap();
        assert_eq!(w2.size(), baseline_len + 4);
    }

    #[test]
    fn idr_pictures_are_sync_samples() {
        let stream = synth_stream(64, 64, 3);
        let units = split_nal_units(&stream).unwrap();
        let parsed = ingest(&units).unwrap();
        assert_eq!(parsed.samples.len(), 3);
        assert!(parsed.samples.iter().all(|s| s.is_sync));
    }
}
