// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end coverage: configurations go in, the finished file is re-read
//! with the crate's independent readback parser and checked structurally.

mod common;

use common::*;
use heif_write::readback::{self, HeifFile};
use heif_write::{Configuration, Error, FourCC};

fn write_to_vec(config: &Configuration) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    heif_write::write_file_to(config, &mut out)?;
    Ok(out)
}

fn write_and_read(config: &Configuration) -> HeifFile {
    let bytes = write_to_vec(config).expect("write_file_to failed");
    readback::read_heif(&mut bytes.as_slice()).expect("readback failed")
}

fn single_master_config(stream_path: &str) -> Configuration {
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{stream_path}",
                    "hdlr_type": "pict",
                    "code_type": "hvc1",
                    "encp_type": "meta",
                    "disp_xdim": 1920,
                    "disp_ydim": 1080
                }}
            }} ]
        }}"#
    );
    Configuration::from_json(&json).expect("config json")
}

#[test]
fn single_master_image_hevc() {
    init_logging();
    let input = temp_input("single.265", &hevc_stream(1920, 1080, 1));
    let config = single_master_config(input.to_str().unwrap());
    let file = write_and_read(&config);

    assert_eq!(file.ftyp.major_brand, b"heic");
    for brand in [b"heic", b"mif1"] {
        assert!(file.ftyp.compatible_brands.contains(&FourCC::new(brand)));
    }

    let meta = file.meta.as_ref().expect("meta missing");
    assert_eq!(meta.handler_type, Some(FourCC::new(b"pict")));
    assert_eq!(meta.items.len(), 1);
    assert_eq!(meta.items[0].item_type, b"hvc1");
    assert_eq!(meta.primary_item_id, Some(1));
    assert!(meta.references.is_empty());

    let props = meta.properties_of(1);
    let mut saw_ispe = false;
    let mut saw_hvcc = false;
    for (prop, essential) in props {
        match prop {
            heif_write::boxes::iprp::ItemProperty::Ispe(ispe) => {
                assert_eq!((ispe.width, ispe.height), (1920, 1080));
                assert!(!essential);
                saw_ispe = true;
            }
            heif_write::boxes::iprp::ItemProperty::HevcConfig(_) => {
                assert!(essential);
                saw_hvcc = true;
            }
            _ => {}
        }
    }
    assert!(saw_ispe && saw_hvcc);

    // One extent, inside one of the emitted mdats.
    let location = meta.location(1).expect("iloc entry missing");
    assert_eq!(location.construction_method, 0);
    assert_eq!(location.extents.len(), 1);
    let (offset, length) = location.extents[0];
    assert!(file.mdats.iter().any(|m| m.contains(offset, length)));

    // The item payload is the length-prefixed IDR access unit.
    let data = file.item_data(1).expect("item data");
    assert_eq!(data.len() as u64, length);
    let nal_len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    assert_eq!(data.len(), 4 + nal_len);

    // Structural round-trip: the writer's box set is recoverable by tag.
    assert_eq!(file.top_level[0], b"ftyp");
    assert!(file.top_level.contains(&FourCC::new(b"meta")));
    assert!(file.top_level.contains(&FourCC::new(b"mdat")));
}

#[test]
fn master_plus_thumbnail() {
    init_logging();
    let master = temp_input("thumb-master.265", &hevc_stream(1280, 720, 1));
    let thumb = temp_input("thumb-thumb.265", &hevc_stream(320, 180, 1));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "hvc1"
                }},
                "thumbs": [ {{
                    "uniq_bsid": 2,
                    "file_path": "{}",
                    "code_type": "hvc1",
                    "sync_rate": 1
                }} ]
            }} ]
        }}"#,
        master.display(),
        thumb.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();

    assert_eq!(meta.items.len(), 2);
    let thumb_edges = meta.references_of_type(b"thmb");
    assert_eq!(thumb_edges.len(), 1);
    assert_eq!(thumb_edges[0].from_item_id, 2);
    assert_eq!(thumb_edges[0].to_item_id, 1);
}

#[test]
fn grid_derivation() {
    init_logging();
    let master = temp_input("grid-master.265", &hevc_stream(1920, 1080, 4));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 3,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "hvc1"
                }},
                "derived": {{
                    "grids": [ {{
                        "uniq_bsid": 3,
                        "refs_list": [1],
                        "idxs_list": [[1, 2, 3, 4]],
                        "columns": 2,
                        "rows": 2,
                        "outputWidth": 3840,
                        "outputHeight": 2160
                    }} ]
                }}
            }} ]
        }}"#,
        master.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();

    assert_eq!(meta.items.len(), 5);
    let grid_item = meta.item(5).expect("grid item missing");
    assert_eq!(grid_item.item_type, b"grid");

    // The descriptor lives in idat and has the 16-bit field layout.
    let location = meta.location(5).unwrap();
    assert_eq!(location.construction_method, 1);
    let payload = file.item_data(5).unwrap();
    assert_eq!(
        payload.as_slice(),
        &[0x00, 0x00, 0x01, 0x01, 0x0f, 0x00, 0x08, 0x70]
    );

    let dimg: Vec<_> = meta
        .references_of_type(b"dimg")
        .iter()
        .map(|r| (r.from_item_id, r.to_item_id))
        .collect();
    assert_eq!(dimg, vec![(5, 1), (5, 2), (5, 3), (5, 4)]);
}

#[test]
fn overlay_with_32_bit_offsets() {
    init_logging();
    let master = temp_input("iovl-master.265", &hevc_stream(640, 480, 1));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "hvc1"
                }},
                "derived": {{
                    "iovls": [ {{
                        "uniq_bsid": 4,
                        "refs_list": [1],
                        "idxs_list": [[1]],
                        "canvasFillValue": [0, 0, 0, 65535],
                        "outputWidth": 100000,
                        "outputHeight": 1000,
                        "offsets": [ {{ "horizontal": 0, "vertical": 0 }} ]
                    }} ]
                }}
            }} ]
        }}"#,
        master.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();

    let overlay_item = meta
        .items
        .iter()
        .find(|i| i.item_type == b"iovl")
        .expect("iovl item missing");
    let payload = file.item_data(overlay_item.item_id).unwrap();
    // flags = 1: every dimension and offset field is 32 bits wide.
    assert_eq!(&payload[0..2], &[0x00, 0x01]);
    assert_eq!(payload.len(), 2 + 8 + 8 + 8);
    assert_eq!(
        u32::from_be_bytes(payload[10..14].try_into().unwrap()),
        100000
    );
}

#[test]
fn auxiliary_alpha_plane() {
    init_logging();
    let master = temp_input("aux-master.265", &hevc_stream(640, 480, 1));
    let alpha = temp_input("aux-alpha.265", &hevc_stream(640, 480, 1));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "hvc1"
                }},
                "auxiliary": [ {{
                    "uniq_bsid": 5,
                    "file_path": "{}",
                    "urn": "urn:mpeg:hevc:2015:auxid:1",
                    "refs_list": [1],
                    "idxs_list": [[1]],
                    "hidden": true
                }} ]
            }} ]
        }}"#,
        master.display(),
        alpha.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();

    let aux_item = meta.item(2).expect("auxiliary item missing");
    assert_eq!(aux_item.flags & 1, 1);

    let mut saw_auxc = false;
    for (prop, essential) in meta.properties_of(2) {
        if let heif_write::boxes::iprp::ItemProperty::AuxC(auxc) = prop {
            assert_eq!(auxc.aux_type, "urn:mpeg:hevc:2015:auxid:1");
            assert!(auxc.aux_subtype.is_empty());
            assert!(essential);
            saw_auxc = true;
        }
    }
    assert!(saw_auxc);

    let auxl = meta.references_of_type(b"auxl");
    assert_eq!(auxl.len(), 1);
    assert_eq!((auxl[0].from_item_id, auxl[0].to_item_id), (2, 1));
}

#[test]
fn two_contents_with_entity_group() {
    init_logging();
    let first = temp_input("altr-1.265", &hevc_stream(640, 480, 1));
    let second = temp_input("altr-2.265", &hevc_stream(640, 480, 1));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [
                {{ "master": {{ "uniq_bsid": 1, "file_path": "{}", "code_type": "hvc1" }} }},
                {{ "master": {{ "uniq_bsid": 2, "file_path": "{}", "code_type": "hvc1" }} }}
            ],
            "egroups": {{
                "altr": {{
                    "idxs_lists": [
                        [ {{ "uniq_bsid": 1, "item_indx": 1 }},
                          {{ "uniq_bsid": 2, "item_indx": 1 }} ]
                    ]
                }}
            }}
        }}"#,
        first.display(),
        second.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();

    assert_eq!(meta.groups.len(), 1);
    let group = &meta.groups[0];
    assert_eq!(group.group_type, b"altr");
    assert_eq!(group.entity_ids.len(), 2);
    assert_eq!(group.entity_ids[0], meta.items[0].item_id);
    assert_eq!(group.entity_ids[1], meta.items[1].item_id);
}

#[test]
fn avc_master_gets_avcc_property() {
    init_logging();
    let input = temp_input("avc-master.264", &avc_stream(320, 240, 1));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "avci", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "avc1",
                    "disp_xdim": 320,
                    "disp_ydim": 240
                }}
            }} ]
        }}"#,
        input.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();
    assert_eq!(meta.items[0].item_type, b"avc1");
    assert!(meta
        .properties_of(1)
        .iter()
        .any(|(p, essential)| *essential
            && matches!(p, heif_write::boxes::iprp::ItemProperty::AvcConfig(_))));
}

#[test]
fn track_encapsulation_writes_sample_tables() {
    init_logging();
    let input = temp_input("trak-master.265", &hevc_stream(640, 480, 4));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "hevc", "other": ["msf1"] }}
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "hvc1",
                    "encp_type": "trak",
                    "disp_xdim": 640,
                    "disp_ydim": 480,
                    "disp_rate": 30,
                    "tick_rate": 90000,
                    "make_vide": true
                }}
            }} ]
        }}"#,
        input.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let bytes = write_to_vec(&config).unwrap();
    let file = readback::read_heif(&mut bytes.as_slice()).unwrap();

    assert!(file.meta.is_none());
    let moov = file.moov.as_ref().expect("moov missing");
    assert_eq!(moov.timescale, 1000);
    // pict track plus the vide alternate
    assert_eq!(moov.tracks.len(), 2);
    assert_eq!(moov.next_track_id, 3);

    let pict = &moov.tracks[0];
    assert_eq!(pict.handler_type, Some(FourCC::new(b"pict")));
    assert_eq!(pict.timescale, 90000);
    assert_eq!(pict.sample_sizes.len(), 4);
    assert_eq!(&pict.sample_deltas[..], &[(4, 3000)]);
    assert_eq!(pict.sample_entry_type, Some(FourCC::new(b"hvc1")));
    assert_eq!(pict.width >> 16, 640);

    let vide = &moov.tracks[1];
    assert_eq!(vide.handler_type, Some(FourCC::new(b"vide")));
    assert_eq!(vide.alternate_group, pict.alternate_group);
    assert_ne!(vide.track_id, pict.track_id);

    // The single chunk must start inside an mdat and hold all samples.
    let chunk_offset = pict.chunk_offsets[0];
    let total: u64 = pict.sample_sizes.iter().map(|&s| u64::from(s)).sum();
    assert!(file.mdats.iter().any(|m| m.contains(chunk_offset, total)));
}

#[test]
fn metadata_and_identity_derivations() {
    init_logging();
    let master = temp_input("full-master.265", &hevc_stream(640, 480, 1));
    let exif = temp_input("full-meta.exif", &[0x4d, 0x4d, 0x00, 0x2a, 1, 2, 3, 4]);
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }},
                "prim_refr": 1,
                "prim_indx": 1
            }},
            "content": [ {{
                "master": {{
                    "uniq_bsid": 1,
                    "file_path": "{}",
                    "code_type": "hvc1"
                }},
                "metadata": [ {{ "file_path": "{}", "hdlr_type": "exif" }} ],
                "derived": {{
                    "irots": [ {{
                        "uniq_bsid": 7,
                        "refs_list": [1],
                        "idxs_list": [[1]],
                        "angle": 90
                    }} ]
                }}
            }} ]
        }}"#,
        master.display(),
        exif.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    let file = write_and_read(&config);
    let meta = file.meta.as_ref().unwrap();

    let iden = meta
        .items
        .iter()
        .find(|i| i.item_type == b"iden")
        .expect("iden item missing");
    let dimg = meta.references_of_type(b"dimg");
    assert_eq!((dimg[0].from_item_id, dimg[0].to_item_id), (iden.item_id, 1));
    assert!(meta
        .properties_of(iden.item_id)
        .iter()
        .any(|(p, essential)| *essential
            && matches!(p, heif_write::boxes::iprp::ItemProperty::Irot(_))));

    let exif_item = meta
        .items
        .iter()
        .find(|i| i.item_type == b"Exif")
        .expect("Exif item missing");
    let cdsc = meta.references_of_type(b"cdsc");
    assert_eq!(
        (cdsc[0].from_item_id, cdsc[0].to_item_id),
        (exif_item.item_id, 1)
    );
    // Payload carries the 4-byte tiff header offset prefix.
    let payload = file.item_data(exif_item.item_id).unwrap();
    assert_eq!(&payload[0..4], &[0, 0, 0, 0]);
    assert_eq!(&payload[4..8], &[0x4d, 0x4d, 0x00, 0x2a]);
}

#[test]
fn version_marker_mdat_is_first() {
    init_logging();
    let input = temp_input("marker.265", &hevc_stream(64, 64, 1));
    let config = single_master_config(input.to_str().unwrap());
    let file = write_and_read(&config);
    let marker = &file.mdats[0];
    let text = String::from_utf8_lossy(&marker.data);
    assert!(text.starts_with("HEIF writer build "));
    // Nothing in iloc points into the marker box.
    let meta = file.meta.as_ref().unwrap();
    for location in &meta.locations {
        for &(offset, length) in &location.extents {
            if location.construction_method == 0 && length > 0 {
                assert!(offset >= marker.offset + marker.data.len() as u64);
            }
        }
    }
}

#[test]
fn unresolved_reference_is_reported() {
    init_logging();
    let master = temp_input("unres-master.265", &hevc_stream(640, 480, 1));
    let alpha = temp_input("unres-alpha.265", &hevc_stream(640, 480, 1));
    let json = format!(
        r#"{{
            "general": {{
                "output_file": "unused.heic",
                "brands": {{ "major": "heic", "other": ["mif1"] }}
            }},
            "content": [ {{
                "master": {{ "uniq_bsid": 1, "file_path": "{}", "code_type": "hvc1" }},
                "auxiliary": [ {{
                    "uniq_bsid": 5,
                    "file_path": "{}",
                    "urn": "urn:mpeg:hevc:2015:auxid:1",
                    "refs_list": [99],
                    "idxs_list": [[1]]
                }} ]
            }} ]
        }}"#,
        master.display(),
        alpha.display()
    );
    let config = Configuration::from_json(&json).unwrap();
    match write_to_vec(&config) {
        Err(Error::UnresolvedReference(99)) => {}
        other => panic!("expected UnresolvedReference(99), got {other:?}"),
    }
}

#[test]
fn unsupported_codec_is_reported() {
    init_logging();
    let input = temp_input("codec.265", &hevc_stream(64, 64, 1));
    let mut config = single_master_config(input.to_str().unwrap());
    config.content[0].master.code_type = "mp4a".into();
    match write_to_vec(&config) {
        Err(Error::UnsupportedCodec(tag)) => assert_eq!(tag, b"mp4a"),
        other => panic!("expected UnsupportedCodec, got {other:?}"),
    }
}

#[test]
fn malformed_bitstream_is_reported_with_its_file() {
    init_logging();
    let input = temp_input("garbage.265", &[0xff; 32]);
    let config = single_master_config(input.to_str().unwrap());
    match write_to_vec(&config) {
        Err(Error::Parse { file: Some(file), .. }) => assert_eq!(file, input),
        other => panic!("expected Parse error, got {other:?}"),
    }
}
