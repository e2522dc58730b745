//! Shared helpers: synthetic Annex-B streams and input staging.

use std::path::PathBuf;

use heif_write::bitstream::BitStream;

/// Unsigned exponential-Golomb encode.
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

fn hevc_nal_header(bs: &mut BitStream, nal_type: u8) {
    bs.write_bits(0, 1); // forbidden_zero_bit
    bs.write_bits(u64::from(nal_type), 6);
    bs.write_bits(0, 6); // nuh_layer_id
    bs.write_bits(1, 3); // nuh_temporal_id_plus1
}

pub fn hevc_sps(width: u32, height: u32) -> Vec<u8> {
    let mut bs = BitStream::new();
    hevc_nal_header(&mut bs, 33);
    bs.write_bits(0, 4); // sps_video_parameter_set_id
    bs.write_bits(0, 3); // sps_max_sub_layers_minus1
    bs.write_bits(1, 1); // sps_temporal_id_nesting_flag
    bs.write_bits(0, 2); // general_profile_space
    bs.write_bits(0, 1); // general_tier_flag
    bs.write_bits(1, 5); // general_profile_idc = Main
    bs.write_bits(0x6000_0000, 32); // compatibility flags
    bs.write_bits(0x9000_0000_0000, 48); // constraint indicator flags
    bs.write_bits(93, 8); // general_level_idc
    write_ue(&mut bs, 0); // sps_seq_parameter_set_id
    write_ue(&mut bs, 1); // chroma_format_idc
    write_ue(&mut bs, width);
    write_ue(&mut bs, height);
    bs.write_bits(0, 1); // conformance_window_flag
    write_ue(&mut bs, 0); // bit_depth_luma_minus8
    write_ue(&mut bs, 0); // bit_depth_chroma_minus8
    write_ue(&mut bs, 4); // log2_max_pic_order_cnt_lsb_minus4
    finish_rbsp(bs)
}

pub fn hevc_vps() -> Vec<u8> {
    let mut bs = BitStream::new();
    hevc_nal_header(&mut bs, 32);
    bs.write_bits(0x4242, 16);
    finish_rbsp(bs)
}

pub fn hevc_pps() -> Vec<u8> {
    let mut bs = BitStream::new();
    hevc_nal_header(&mut bs, 34);
    write_ue(&mut bs, 0);
    write_ue(&mut bs, 0);
    finish_rbsp(bs)
}

pub fn hevc_idr_slice(payload_len: usize) -> Vec<u8> {
    let mut bs = BitStream::new();
    hevc_nal_header(&mut bs, 19); // IDR_W_RADL
    bs.write_bits(1, 1); // first_slice_segment_in_pic_flag
    bs.write_bits(0x5a, 7);
    let mut nal = finish_rbsp(bs);
    nal.resize(nal.len() + payload_len, 0xa5);
    nal
}

pub fn annexb(nal_units: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nal_units {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

/// A complete HEVC stream with the given number of IDR access units.
pub fn hevc_stream(width: u32, height: u32, pictures: usize) -> Vec<u8> {
    let mut units = vec![hevc_vps(), hevc_sps(width, height), hevc_pps()];
    for i in 0..pictures {
        units.push(hevc_idr_slice(16 + i));
    }
    annexb(&units)
}

pub fn avc_sps(width: u32, height: u32) -> Vec<u8> {
    assert!(width % 16 == 0 && height % 16 == 0);
    let mut bs = BitStream::new();
    bs.write_bits(0x67, 8); // nal_ref_idc 3, type 7
    bs.write_bits(66, 8); // profile_idc = Baseline
    bs.write_bits(128, 8); // constraint flags
    bs.write_bits(30, 8); // level_idc
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

pub fn avc_pps() -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_bits(0x68, 8);
    write_ue(&mut bs, 0);
    write_ue(&mut bs, 0);
    finish_rbsp(bs)
}

pub fn avc_idr_slice(payload_len: usize) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_bits(0x65, 8); // IDR
    write_ue(&mut bs, 0); // first_mb_in_slice
    write_ue(&mut bs, 7); // slice_type
    let mut nal = finish_rbsp(bs);
    nal.resize(nal.len() + payload_len, 0x5a);
    nal
}

pub fn avc_stream(width: u32, height: u32, pictures: usize) -> Vec<u8> {
    let mut units = vec![avc_sps(width, height), avc_pps()];
    for i in 0..pictures {
        units.push(avc_idr_slice(8 + i));
    }
    annexb(&units)
}

/// Stage test input under a collision-free temp name.
pub fn temp_input(name: &str, bytes: &[u8]) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("heif-write-test-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).expect("write test input");
    path
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
