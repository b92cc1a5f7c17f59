//! The 8-byte peer tag carried at the end of `custom`.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of the big-endian edge id tag
pub const TAG_LEN: usize = 8;

/// `custom ‖ edge_id.to_be_bytes()`
pub fn append_edge_id(custom: &[u8], edge_id: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(custom.len() + TAG_LEN);
    buf.put_slice(custom);
    buf.put_u64(edge_id);
    buf.freeze()
}

/// Split the trailing tag off `custom`.
///
/// Returns `None` when `custom` is shorter than the tag; such an envelope is
/// untagged and is left as it is.
pub fn split_edge_id(custom: &Bytes) -> Option<(u64, Bytes)> {
    if custom.len() < TAG_LEN {
        return None;
    }
    let at = custom.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&custom[at..]);
    Some((u64::from_be_bytes(tag), custom.slice(..at)))
}
