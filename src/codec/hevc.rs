//! HEVC (ISO 23008-2) NAL unit handling and the `hvcC` configuration record.
//! Record layout per ISO 14496-15 § 8.3.3.1

use arrayvec::ArrayVec;

use crate::bitstream::{byte_stream_to_rbsp, BitStream};
use crate::codec::nal::{AccessUnitBuilder, ParsedBitstream};
use crate::codec::{add_nal_unit, DecoderConfig, NalArray};
use crate::{Error, Result};

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;

/// NAL unit type from the first byte of a two-byte HEVC NAL header.
pub fn nal_unit_type(nal_unit: &[u8]) -> Result<u8> {
    let first = nal_unit.first().ok_or(Error::EndOfStream)?;
    Ok((first >> 1) & 0x3f)
}

fn is_vcl(nal_type: u8) -> bool {
    nal_type < 32
}

/// BLA/IDR/CRA and the reserved IRAP types.
fn is_irap(nal_type: u8) -> bool {
    (16..=23).contains(&nal_type)
}

/// First bit after the two-byte NAL header is
/// `first_slice_segment_in_pic_flag`. See ISO 23008-2 § 7.3.6.1
fn is_first_slice(nal_unit: &[u8]) -> bool {
    nal_unit.get(2).is_some_and(|b| b & 0x80 != 0)
}

#[derive(Debug, Clone)]
pub struct HevcDecoderConfigurationRecord {
    pub configuration_version: u8,
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: [u8; 6],
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: u8,
    pub length_size_minus_one: u8,
    pic_width_in_luma_samples: u16,
    pic_height_in_luma_samples: u16,
    conf_win_left_offset: u16,
    conf_win_right_offset: u16,
    conf_win_top_offset: u16,
    conf_win_bottom_offset: u16,
    nal_arrays: Vec<NalArray>,
}

impl Default for HevcDecoderConfigurationRecord {
    fn default() -> Self {
        Self {
            configuration_version: 1,
            general_profile_space: 0,
            general_tier_flag: 0,
            general_profile_idc: 0,
            general_profile_compatibility_flags: 0,
            general_constraint_indicator_flags: [0; 6],
            general_level_idc: 0,
            min_spatial_segmentation_idc: 0,
            parallelism_type: 0,
            chroma_format: 0,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: 0,
            temporal_id_nested: 0,
            length_size_minus_one: 0,
            pic_width_in_luma_samples: 0,
            pic_height_in_luma_samples: 0,
            conf_win_left_offset: 0,
            conf_win_right_offset: 0,
            conf_win_top_offset: 0,
            conf_win_bottom_offset: 0,
            nal_arrays: Vec::new(),
        }
    }
}

impl HevcDecoderConfigurationRecord {
    /// Fill profile/tier/level, chroma and dimension fields from an SPS in
    /// byte-stream form. See ISO 23008-2 § 7.3.2.2.1
    pub fn config_from_sps(&mut self, sps: &[u8], frame_rate: f64) -> Result<()> {
        let rbsp = byte_stream_to_rbsp(sps);
        let mut r = BitStream::from_vec(rbsp);

        let frame_rate = frame_rate.min(f64::from(0xffffu16) / 256.0);
        self.avg_frame_rate = (frame_rate * 256.0 + 0.5) as u16;
        self.constant_frame_rate = 0;
        self.length_size_minus_one = 3; // 4-byte NAL length fields

        // NAL unit header
        r.read_bits(1)?; // forbidden_zero_bit
        r.read_bits(6)?; // nal_unit_type
        r.read_bits(6)?; // nuh_layer_id
        r.read_bits(3)?; // nuh_temporal_id_plus1

        r.read_bits(4)?; // sps_video_parameter_set_id
        let max_num_sub_layers_minus1 = r.read_bits(3)?; // sps_max_sub_layers_minus1
        self.num_temporal_layers = max_num_sub_layers_minus1 as u8 + 1;
        self.temporal_id_nested = r.read_bits(1)? as u8; // sps_temporal_id_nesting_flag

        // profile_tier_level
        self.general_profile_space = r.read_bits(2)? as u8;
        self.general_tier_flag = r.read_bits(1)? as u8;
        self.general_profile_idc = r.read_bits(5)? as u8;
        self.general_profile_compatibility_flags = r.read_bits(32)?;
        for byte in self.general_constraint_indicator_flags.iter_mut() {
            *byte = r.read_bits(8)? as u8;
        }
        self.general_level_idc = r.read_bits(8)? as u8;

        let mut sub_layer_profile_present: ArrayVec<bool, 8> = ArrayVec::new();
        let mut sub_layer_level_present: ArrayVec<bool, 8> = ArrayVec::new();
        for _ in 0..max_num_sub_layers_minus1 {
            sub_layer_profile_present.push(r.read_bits(1)? != 0);
            sub_layer_level_present.push(r.read_bits(1)? != 0);
        }
        if max_num_sub_layers_minus1 > 0 {
            for _ in max_num_sub_layers_minus1..8 {
                r.read_bits(2)?; // reserved_zero_2bits
            }
        }
        // Sub-layer syntax elements are not carried in the record.
        for i in 0..max_num_sub_layers_minus1 as usize {
            if sub_layer_profile_present[i] {
                r.read_bits(2)?; // sub_layer_profile_space
                r.read_bits(1)?; // sub_layer_tier_flag
                r.read_bits(5)?; // sub_layer_profile_idc
                r.read_bits(32)?; // sub_layer_profile_compatibility_flags
                for _ in 0..6 {
                    r.read_bits(8)?; // sub-layer constraint flags
                }
            }
            if sub_layer_level_present[i] {
                r.read_bits(8)?; // sub_layer_level_idc
            }
        }

        r.read_exp_golomb()?; // sps_seq_parameter_set_id
        self.chroma_format = r.read_exp_golomb()? as u8;
        if self.chroma_format == 3 {
            r.read_bits(1)?; // separate_colour_plane_flag
        }
        self.pic_width_in_luma_samples = r.read_exp_golomb()? as u16;
        self.pic_height_in_luma_samples = r.read_exp_golomb()? as u16;

        if r.read_bits(1)? != 0 {
            // conformance_window_flag
            self.conf_win_left_offset = r.read_exp_golomb()? as u16;
            self.conf_win_right_offset = r.read_exp_golomb()? as u16;
            self.conf_win_top_offset = r.read_exp_golomb()? as u16;
            self.conf_win_bottom_offset = r.read_exp_golomb()? as u16;
        } else {
            self.conf_win_left_offset = 0;
            self.conf_win_right_offset = 0;
            self.conf_win_top_offset = 0;
            self.conf_win_bottom_offset = 0;
        }

        self.bit_depth_luma_minus8 = r.read_exp_golomb()? as u8;
        self.bit_depth_chroma_minus8 = r.read_exp_golomb()? as u8;
        r.read_exp_golomb()?; // log2_max_pic_order_cnt_lsb_minus4

        self.min_spatial_segmentation_idc = 0;
        self.parallelism_type = 0;
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

    /// Picture width after conformance-window cropping.
    pub fn pic_width(&self) -> u16 {
        const SUB_WIDTH_C: [u16; 4] = [1, 2, 2, 1];
        self.pic_width_in_luma_samples
            - SUB_WIDTH_C[usize::from(self.chroma_format & 3)]
                * (self.conf_win_left_offset + self.conf_win_right_offset)
    }

    /// Picture height after conformance-window cropping.
    pub fn pic_height(&self) -> u16 {
        const SUB_HEIGHT_C: [u16; 4] = [1, 2, 1, 1];
        self.pic_height_in_luma_samples
            - SUB_HEIGHT_C[usize::from(self.chroma_format & 3)]
                * (self.conf_win_top_offset + self.conf_win_bottom_offset)
    }

    pub fn write_record(&self, w: &mut BitStream) -> Result<()> {
        w.write_bits(u64::from(self.configuration_version), 8);
        w.write_bits(u64::from(self.general_profile_space), 2);
        w.write_bits(u64::from(self.general_tier_flag), 1);
        w.write_bits(u64::from(self.general_profile_idc), 5);
        w.write_bits(u64::from(self.general_profile_compatibility_flags), 32);
        for byte in &self.general_constraint_indicator_flags {
            w.write_bits(u64::from(*byte), 8);
        }
        w.write_bits(u64::from(self.general_level_idc), 8);
        w.write_bits(0xf, 4); // reserved = '1111'b
        w.write_bits(u64::from(self.min_spatial_segmentation_idc), 12);
        w.write_bits(0x3f, 6); // reserved = '111111'b
        w.write_bits(u64::from(self.parallelism_type), 2);
        w.write_bits(0x3f, 6); // reserved = '111111'b
        w.write_bits(u64::from(self.chroma_format), 2);
        w.write_bits(0x1f, 5); // reserved = '11111'b
        w.write_bits(u64::from(self.bit_depth_luma_minus8), 3);
        w.write_bits(0x1f, 5); // reserved = '11111'b
        w.write_bits(u64::from(self.bit_depth_chroma_minus8), 3);
        w.write_bits(u64::from(self.avg_frame_rate), 16);
        w.write_bits(u64::from(self.constant_frame_rate), 2);
        w.write_bits(u64::from(self.num_temporal_layers), 3);
        w.write_bits(u64::from(self.temporal_id_nested), 1);
        w.write_bits(u64::from(self.length_size_minus_one), 2);

        w.write_bits(self.nal_arrays.len() as u64, 8);
        for array in &self.nal_arrays {
            w.write_bits(u64::from(array.array_completeness), 1);
            w.write_bits(0, 1); // reserved
            w.write_bits(u64::from(array.nal_unit_type), 6);
            w.write_bits(array.nal_units.len() as u64, 16);
            for nal in &array.nal_units {
                w.write_bits(nal.len() as u64, 16);
                w.write_bytes(nal);
            }
        }
        Ok(())
    }

    pub fn parse_record(r: &mut BitStream) -> Result<Self> {
        let mut record = Self {
            configuration_version: r.read_bits(8)? as u8,
            general_profile_space: r.read_bits(2)? as u8,
            general_tier_flag: r.read_bits(1)? as u8,
            general_profile_idc: r.read_bits(5)? as u8,
            general_profile_compatibility_flags: r.read_bits(32)?,
            ..Self::default()
        };
        for byte in record.general_constraint_indicator_flags.iter_mut() {
            *byte = r.read_bits(8)? as u8;
        }
        record.general_level_idc = r.read_bits(8)? as u8;
        r.read_bits(4)?; // reserved
        record.min_spatial_segmentation_idc = r.read_bits(12)? as u16;
        r.read_bits(6)?; // reserved
        record.parallelism_type = r.read_bits(2)? as u8;
        r.read_bits(6)?; // reserved
        record.chroma_format = r.read_bits(2)? as u8;
        r.read_bits(5)?; // reserved
        record.bit_depth_luma_minus8 = r.read_bits(3)? as u8;
        r.read_bits(5)?; // reserved
        record.bit_depth_chroma_minus8 = r.read_bits(3)? as u8;
        record.avg_frame_rate = r.read_bits(16)? as u16;
        record.constant_frame_rate = r.read_bits(2)? as u8;
        record.num_temporal_layers = r.read_bits(3)? as u8;
        record.temporal_id_nested = r.read_bits(1)? as u8;
        record.length_size_minus_one = r.read_bits(2)? as u8;

        let num_of_arrays = r.read_bits(8)?;
        for _ in 0..num_of_arrays {
            let array_completeness = r.read_bits(1)? != 0;
            r.read_bits(1)?; // reserved
            let nal_unit_type = r.read_bits(6)? as u8;
            let num_nalus = r.read_bits(16)?;
            for _ in 0..num_nalus {
                let nal_size = r.read_bits(16)?;
                let nal_data = r.read_bytes(u64::from(nal_size))?;
                record.add_nal_unit(&nal_data, nal_unit_type, array_completeness);
            }
        }
        Ok(record)
    }
}

/// Build the configuration record and access units for an HEVC stream.
pub(crate) fn ingest(nal_units: &[&[u8]], frame_rate: f64) -> Result<ParsedBitstream> {
    let mut record = HevcDecoderConfigurationRecord::default();
    let mut sps_seen = false;
    let mut builder = AccessUnitBuilder::new();

    for &nal_unit in nal_units {
        let nal_type = nal_unit_type(nal_unit)?;
        match nal_type {
            NAL_VPS | NAL_SPS | NAL_PPS => {
                if nal_type == NAL_SPS && !sps_seen {
                    record.config_from_sps(nal_unit, frame_rate)?;
                    sps_seen = true;
                }
                record.add_nal_unit(nal_unit, nal_type, true);
            }
            NAL_AUD => builder.push(nal_unit, true, false),
            _ if is_vcl(nal_type) => {
                builder.push(nal_unit, is_first_slice(nal_unit), is_irap(nal_type));
            }
            _ => builder.push(nal_unit, false, false),
        }
    }

    if !sps_seen {
        return Err(Error::malformed("no SPS in HEVC bitstream"));
    }
    let samples = builder.into_samples();
    if samples.is_empty() {
        return Err(Error::malformed("no coded pictures in HEVC bitstream"));
    }
    Ok(ParsedBitstream {
        config: DecoderConfig::Hevc(record),
        samples,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Synthetic HEVC streams for unit and integration tests.

    use crate::bitstream::BitStream;

    pub fn write_ue(bs: &mut BitStream, value: u32) {
        let code = u64::from(value) + 1;
        let k = 63 - code.leading_zeros();
        bs.write_bits(code, 2 * k + 1);
    }

    /// Insert emulation-prevention bytes into an RBSP.
    pub fn rbsp_to_byte_stream(rbsp: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(rbsp.len());
        let mut zeros = 0u32;
        for &byte in rbsp {
            if zeros >= 2 && byte <= 0x03 {
                out.push(0x03);
                zeros = 0;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            out.push(byte);
        }
        out
    }

    fn finish_rbsp(mut bs: BitStream) -> Vec<u8> {
        bs.write_bits(1, 1); // rbsp_stop_one_bit
        while !bs.is_byte_aligned() {
            bs.write_bits(0, 1);
        }
        rbsp_to_byte_stream(&bs.into_storage())
    }

    fn nal_header(bs: &mut BitStream, nal_type: u8) {
        bs.write_bits(0, 1); // forbidden_zero_bit
        bs.write_bits(u64::from(nal_type), 6);
        bs.write_bits(0, 6); // nuh_layer_id
        bs.write_bits(1, 3); // nuh_temporal_id_plus1
    }

    /// A Main-profile SPS for the given dimensions.
    pub fn synth_sps(width: u32, height: u32) -> Vec<u8> {
        let mut bs = BitStream::new();
        nal_header(&mut bs, super::NAL_SPS);
        bs.write_bits(0, 4); // sps_video_parameter_set_id
        bs.write_bits(0, 3); // sps_max_sub_layers_minus1
        bs.write_bits(1, 1); // sps_temporal_id_nesting_flag
        bs.write_bits(0, 2); // general_profile_space
        bs.write_bits(0, 1); // general_tier_flag
        bs.write_bits(1, 5); // general_profile_idc = Main
        bs.write_bits(0x6000_0000, 32); // compatibility flags
        bs.write_bits(0x9000_0000_0000, 48); // constraint indicator flags
        bs.write_bits(93, 8); // general_level_idc = 3.1
        write_ue(&mut bs, 0); // sps_seq_parameter_set_id
        write_ue(&mut bs, 1); // chroma_format_idc = 4:2:0
        write_ue(&mut bs, width);
        write_ue(&mut bs, height);
        bs.write_bits(0, 1); // conformance_window_flag
        write_ue(&mut bs, 0); // bit_depth_luma_minus8
        write_ue(&mut bs, 0); // bit_depth_chroma_minus8
        write_ue(&mut bs, 4); // log2_max_pic_order_cnt_lsb_minus4
        finish_rbsp(bs)
    }

    pub fn synth_vps() -> Vec<u8> {
        let mut bs = BitStream::new();
        nal_header(&mut bs, super::NAL_VPS);
        bs.write_bits(0x4242, 16); // opaque payload for the record
        finish_rbsp(bs)
    }

    pub fn synth_pps() -> Vec<u8> {
        let mut bs = BitStream::new();
        nal_header(&mut bs, super::NAL_PPS);
        write_ue(&mut bs, 0); // pps_pic_parameter_set_id
        write_ue(&mut bs, 0); // pps_seq_parameter_set_id
        finish_rbsp(bs)
    }

    /// A fake IDR slice; only the header bits matter to the writer.
    pub fn synth_idr_slice(payload_len: usize) -> Vec<u8> {
        let mut bs = BitStream::new();
        nal_header(&mut bs, 19); // IDR_W_RADL
        bs.write_bits(1, 1); // first_slice_segment_in_pic_flag
        bs.write_bits(0x5a, 7);
        let mut nal = finish_rbsp(bs);
        nal.resize(nal.len() + payload_len, 0xa5);
        nal
    }

    /// Assemble NAL units into an Annex-B stream with 4-byte start codes.
    pub fn annexb(nal_units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nal_units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    /// A complete single-layer stream with `pictures` IDR access units.
    pub fn synth_stream(width: u32, height: u32, pictures: usize) -> Vec<u8> {
        let vps = synth_vps();
        let sps = synth_sps(width, height);
        let pps = synth_pps();
        let mut units: Vec<Vec<u8>> = vec![vps, sps, pps];
        for i in 0..pictures {
            units.push(synth_idr_slice(16 + i));
        }
        let refs: Vec<&[u8]> = units.iter().map(|u| u.as_slice()).collect();
        annexb(&refs)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::codec::nal::split_nal_units;

    #[test]
    fn sps_fields_reach_the_record() {
        let sps = synth_sps(1920, 1080);
        let mut record = HevcDecoderConfigurationRecord::default();
        record.config_from_sps(&sps, 0.0).unwrap();
        assert_eq!(record.pic_width(), 1920);
        assert_eq!(record.pic_height(), 1080);
        assert_eq!(record.general_profile_idc, 1);
        assert_eq!(record.general_level_idc, 93);
        assert_eq!(record.chroma_format, 1);
        assert_eq!(record.num_temporal_layers, 1);
        assert_eq!(record.length_size_minus_one, 3);
        assert_eq!(record.avg_frame_rate, 0);
    }

    #[test]
    fn record_round_trips_with_parameter_sets() {
        let stream = synth_stream(640, 480, 1);
        let units = split_nal_units(&stream).unwrap();
        let parsed = ingest(&units, 0.0).unwrap();
        let record = match &parsed.config {
            crate::codec::DecoderConfig::Hevc(r) => r,
            _ => unreachable!(),
        };
        assert_eq!(record.nal_arrays().len(), 3);

        let mut w = BitStream::new();
        record.write_record(&mut w).unwrap();
        w.reset();
        let reparsed = HevcDecoderConfigurationRecord::parse_record(&mut w).unwrap();
        assert_eq!(reparsed.general_profile_idc, record.general_profile_idc);
        assert_eq!(reparsed.nal_arrays().len(), 3);
        assert_eq!(
            reparsed.nal_arrays()[1].nal_units[0],
            record.nal_arrays()[1].nal_units[0]
        );
    }

    #[test]
    fn pictures_become_sync_samples() {
        let stream = synth_stream(64, 64, 4);
        let units = split_nal_units(&stream).unwrap();
        let parsed = ingest(&units, 0.0).unwrap();
        assert_eq!(parsed.samples.len(), 4);
        assert!(parsed.samples.iter().all(|s| s.is_sync));
    }

    #[test]
    fn stream_without_sps_is_rejected() {
        let idr = synth_idr_slice(8);
        let stream = annexb(&[idr.as_slice()]);
        let units = split_nal_units(&stream).unwrap();
        assert!(ingest(&units, 0.0).is_err());
    }

    #[test]
    fn frame_rate_is_scaled_and_saturated() {
        let sps = synth_sps(64, 64);
        let mut record = HevcDecoderConfigurationRecord::default();
        record.config_from_sps(&sps, 30.0).unwrap();
        assert_eq!(record.avg_frame_rate, 30 * 256);
        record.config_from_sps(&sps, 10_000.0).unwrap();
        assert_eq!(record.avg_frame_rate, 0xffff);
    }
}
