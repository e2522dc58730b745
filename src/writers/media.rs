//! Media data staging: one `mdat` per contributing context.
//!
//! Samples arrive as access units and are stored in length-prefixed form:
//! every NAL unit is preceded by a 4-byte big-endian length. Offsets handed
//! back to writers are relative to the box payload, so a later switch to the
//! 64-bit size header cannot invalidate them.

use std::collections::BTreeMap;
use std::io::Write;

use crate::codec::Sample;
use crate::store::ContextId;
use crate::writers::MdatExtent;
use crate::{Error, Result};

/// Pseudo context for the compatibility-marker mdat, ordered before every
/// real context ID.
const VERSION_MARKER_KEY: ContextId = 0;

/// One staged `mdat`.
#[derive(Debug, Default)]
pub(crate) struct MediaDataBox {
    payload: Vec<u8>,
}

impl MediaDataBox {
    /// Append raw bytes; returns their payload-relative offset.
    pub fn add_data(&mut self, data: &[u8]) -> u64 {
        let offset = self.payload.len() as u64;
        self.payload.extend_from_slice(data);
        offset
    }

    /// Append one access unit in length-prefixed form.
    pub fn add_sample(&mut self, sample: &Sample) -> (u64, u64) {
        let offset = self.payload.len() as u64;
        for nal in &sample.nal_units {
            self.payload
                .extend_from_slice(&(nal.len() as u32).to_be_bytes());
            self.payload.extend_from_slice(nal);
        }
        (offset, self.payload.len() as u64 - offset)
    }

    pub fn payload_size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// 8-byte header normally, 16 when the box size needs `largesize`.
    pub fn header_size(&self) -> u64 {
        if self.payload.len() as u64 + 8 > u64::from(u32::MAX) {
            16
        } else {
            8
        }
    }

    pub fn box_size(&self) -> u64 {
        self.header_size() + self.payload_size()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.header_size() == 16 {
            out.write_all(&1u32.to_be_bytes())?;
            out.write_all(b"mdat")?;
            out.write_all(&self.box_size().to_be_bytes())?;
        } else {
            out.write_all(&(self.box_size() as u32).to_be_bytes())?;
            out.write_all(b"mdat")?;
        }
        out.write_all(&self.payload)?;
        Ok(())
    }
}

/// All staged `mdat`s, emitted in ascending context-ID order with the
/// version-marker box first.
#[derive(Debug)]
pub(crate) struct MediaStore {
    boxes: BTreeMap<ContextId, MediaDataBox>,
}

impl MediaStore {
    pub fn new() -> Self {
        let mut marker = MediaDataBox::default();
        marker.add_data(
            format!("HEIF writer build {}", env!("CARGO_PKG_VERSION")).as_bytes(),
        );
        let mut boxes = BTreeMap::new();
        boxes.insert(VERSION_MARKER_KEY, marker);
        Self { boxes }
    }

    /// The staging box of one context, created on first use.
    pub fn for_context(&mut self, context: ContextId) -> Result<&mut MediaDataBox> {
        if context == VERSION_MARKER_KEY {
            return Err(Error::Inconsistent("context id collides with marker mdat"));
        }
        Ok(self.boxes.entry(context).or_default())
    }

    /// Stage one access unit and describe where it went.
    pub fn add_sample(&mut self, context: ContextId, sample: &Sample) -> Result<MdatExtent> {
        let (offset, length) = self.for_context(context)?.add_sample(sample);
        Ok(MdatExtent {
            context,
            offset,
            length,
        })
    }

    /// Stage raw bytes and describe where they went.
    pub fn add_data(&mut self, context: ContextId, data: &[u8]) -> Result<MdatExtent> {
        let offset = self.for_context(context)?.add_data(data);
        Ok(MdatExtent {
            context,
            offset,
            length: data.len() as u64,
        })
    }

    /// Boxes in emission order.
    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &MediaDataBox)> {
        self.boxes.iter().map(|(&context, data)| (context, data))
    }

    pub fn total_size(&self) -> u64 {
        self.boxes.values().map(MediaDataBox::box_size).sum()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for mdat in self.boxes.values() {
            mdat.write_to(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(units: &[&[u8]]) -> Sample {
        Sample {
            nal_units: units.iter().map(|u| u.to_vec()).collect(),
            is_sync: true,
        }
    }

    #[test]
    fn samples_become_length_prefixed() {
        let mut mdat = MediaDataBox::default();
        let (offset, length) = mdat.add_sample(&sample(&[&[0xaa, 0xbb], &[0xcc]]));
        assert_eq!(offset, 0);
        assert_eq!(length, 4 + 2 + 4 + 1);
        let mut out = Vec::new();
        mdat.write_to(&mut out).unwrap();
        assert_eq!(&out[..8], &[0, 0, 0, 19, b'm', b'd', b'a', b't']);
        assert_eq!(&out[8..], &[0, 0, 0, 2, 0xaa, 0xbb, 0, 0, 0, 1, 0xcc]);
    }

    #[test]
    fn store_orders_marker_before_contexts() {
        let mut store = MediaStore::new();
        store.add_sample(1001, &sample(&[&[1]])).unwrap();
        store.add_sample(1000, &sample(&[&[2]])).unwrap();
        let order: Vec<_> = store.iter().map(|(ctx, _)| ctx).collect();
        assert_eq!(order, vec![0, 1000, 1001]);
        let marker = &store.iter().next().unwrap().1;
        let text = String::from_utf8_lossy(
            &marker.payload[..],
        )
        .into_owned();
        assert!(text.starts_with("HEIF writer build "));
    }

    #[test]
    fn consecutive_extents_are_contiguous() {
        let mut store = MediaStore::new();
        let first = store.add_sample(1000, &sample(&[&[1, 2, 3]])).unwrap();
        let second = store.add_sample(1000, &sample(&[&[4]])).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(first.length, 7);
        assert_eq!(second.offset, 7);
        assert_eq!(second.length, 5);
    }
}
