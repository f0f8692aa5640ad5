//! Record layout
//!
//! ```text
//! PUT:    VLQ(key_len + 1) | VLQ(value_len) | key | value
//! DELETE: 0x00             | VLQ(key_len)   | key
//! ```
//!
//! A PUT's first VLQ is never zero, which is what tells the two apart.

use serde::Serialize;
use tessera_core::varint::{encode_vlq, vlq_size, MAX_VLQ_LEN};

/// Marker byte opening every DELETE record
pub const DELETE_MARKER: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    Put,
    Delete,
}

/// Decoded record prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub key_len: u64,
    /// Always zero for deletes
    pub value_len: u64,
}

impl RecordHeader {
    /// Full on-disk size of the record, prefix included
    pub fn encoded_len(&self) -> u64 {
        match self.kind {
            RecordKind::Put => put_record_size(self.key_len, self.value_len),
            RecordKind::Delete => delete_record_size(self.key_len),
        }
    }

    /// Bytes following the prefix
    pub fn body_len(&self) -> u64 {
        self.key_len + self.value_len
    }
}

pub fn put_record_size(key_len: u64, value_len: u64) -> u64 {
    (vlq_size(key_len + 1) + vlq_size(value_len)) as u64 + key_len + value_len
}

pub fn delete_record_size(key_len: u64) -> u64 {
    1 + vlq_size(key_len) as u64 + key_len
}

/// Encode a PUT prefix into `buf`, returning its length
pub(crate) fn encode_put_prefix(key_len: u64, value_len: u64, buf: &mut [u8; 2 * MAX_VLQ_LEN]) -> usize {
    let mut tmp = [0u8; MAX_VLQ_LEN];
    let a = encode_vlq(key_len + 1, &mut tmp);
    buf[..a].copy_from_slice(&tmp[..a]);
    let b = encode_vlq(value_len, &mut tmp);
    buf[a..a + b].copy_from_slice(&tmp[..b]);
    a + b
}

/// Encode a DELETE prefix into `buf`, returning its length
pub(crate) fn encode_delete_prefix(key_len: u64, buf: &mut [u8; 2 * MAX_VLQ_LEN]) -> usize {
    let mut tmp = [0u8; MAX_VLQ_LEN];
    buf[0] = DELETE_MARKER;
    let n = encode_vlq(key_len, &mut tmp);
    buf[1..1 + n].copy_from_slice(&tmp[..n]);
    1 + n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_encoding() {
        let mut buf = [0u8; 2 * MAX_VLQ_LEN];
        let n = encode_put_prefix(3, 200, &mut buf);
        assert_eq!(&buf[..n], &[4, 0xc8, 0x01]);
        assert_eq!(put_record_size(3, 200), 3 + 3 + 200);

        let n = encode_delete_prefix(127, &mut buf);
        assert_eq!(&buf[..n], &[0, 127]);
        assert_eq!(delete_record_size(127), 2 + 127);
    }

    #[test]
    fn test_header_sizes() {
        let put = RecordHeader { kind: RecordKind::Put, key_len: 1, value_len: 1 };
        assert_eq!(put.encoded_len(), 4);
        assert_eq!(put.body_len(), 2);

        let delete = RecordHeader { kind: RecordKind::Delete, key_len: 1, value_len: 0 };
        assert_eq!(delete.encoded_len(), 3);
    }
}
