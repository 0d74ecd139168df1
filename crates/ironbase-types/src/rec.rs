//! Physical record layout.
//!
//! A record is a flat byte sequence:
//!
//! ```text
//! off        len  field
//! 0          1    info bits (bit 0 = delete-marked)
//! 1          2    n_fields, big-endian
//! 3          2*n  field length directory, big-endian u16 per field
//! 3 + 2*n    8    trx id, big-endian
//! + 8        8    roll pointer, big-endian
//! ...             field payloads, concatenated in field order
//! ```
//!
//! Ordering is defined by the owning index: the first `n_uniq` fields form
//! the order prefix, compared field-wise bytewise. Accessors here take the
//! record slice as produced by the page slot directory; a malformed slice
//! is page corruption and panics.

use crate::TrxId;

/// Info bit marking a delete-marked record.
pub const REC_INFO_DELETE_MARKED: u8 = 0x01;

/// Packed pointer into the undo log identifying a record's previous
/// version.
///
/// Layout (most significant bit first): 1 insert flag, 7 bits rseg id,
/// 24 reserved, 32 bits record number within the rseg. The all-zero value
/// is the null pointer: "no previous version" (a record inserted by a
/// transaction whose undo has been purged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RollPtr(pub u64);

impl RollPtr {
    /// "No previous version."
    pub const NULL: Self = Self(0);

    const INSERT_FLAG: u64 = 1 << 63;

    /// Pack an undo record address.
    ///
    /// # Panics
    ///
    /// Panics if `rseg_id` does not fit in 7 bits.
    #[must_use]
    pub fn new(is_insert: bool, rseg_id: u8, rec_no: u32) -> Self {
        assert!(rseg_id < 128, "rseg id {rseg_id} out of range");
        let mut v = (u64::from(rseg_id) << 56) | u64::from(rec_no);
        if is_insert {
            v |= Self::INSERT_FLAG;
        }
        Self(v)
    }

    /// Whether this points at an insert undo record.
    #[inline]
    #[must_use]
    pub const fn is_insert(self) -> bool {
        self.0 & Self::INSERT_FLAG != 0
    }

    /// Rollback segment id.
    #[inline]
    #[must_use]
    pub const fn rseg_id(self) -> u8 {
        ((self.0 >> 56) & 0x7f) as u8
    }

    /// Record number within the rollback segment.
    #[inline]
    #[must_use]
    pub const fn rec_no(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

const N_FIELDS_OFF: usize = 1;
const DIR_OFF: usize = 3;

/// Fixed header length for a record with `n` fields (everything before the
/// field payloads).
#[inline]
#[must_use]
pub const fn header_len(n_fields: usize) -> usize {
    DIR_OFF + 2 * n_fields + 8 + 8
}

/// Encode a record into a fresh buffer.
#[must_use]
pub fn encode(fields: &[&[u8]], info_bits: u8, trx_id: TrxId, roll_ptr: RollPtr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        header_len(fields.len()) + fields.iter().map(|f| f.len()).sum::<usize>(),
    );
    encode_into(&mut buf, fields, info_bits, trx_id, roll_ptr);
    buf
}

/// Encode a record, appending to `buf`.
pub fn encode_into(
    buf: &mut Vec<u8>,
    fields: &[&[u8]],
    info_bits: u8,
    trx_id: TrxId,
    roll_ptr: RollPtr,
) {
    let n = u16::try_from(fields.len()).expect("field count fits in u16");
    buf.push(info_bits);
    buf.extend_from_slice(&n.to_be_bytes());
    for f in fields {
        let len = u16::try_from(f.len()).expect("field length fits in u16");
        buf.extend_from_slice(&len.to_be_bytes());
    }
    buf.extend_from_slice(&trx_id.0.to_be_bytes());
    buf.extend_from_slice(&roll_ptr.0.to_be_bytes());
    for f in fields {
        buf.extend_from_slice(f);
    }
}

#[inline]
#[must_use]
pub fn info_bits(rec: &[u8]) -> u8 {
    rec[0]
}

#[inline]
#[must_use]
pub fn is_delete_marked(rec: &[u8]) -> bool {
    rec[0] & REC_INFO_DELETE_MARKED != 0
}

#[inline]
#[must_use]
pub fn n_fields(rec: &[u8]) -> usize {
    u16::from_be_bytes([rec[N_FIELDS_OFF], rec[N_FIELDS_OFF + 1]]) as usize
}

fn field_len(rec: &[u8], i: usize) -> usize {
    let off = DIR_OFF + 2 * i;
    u16::from_be_bytes([rec[off], rec[off + 1]]) as usize
}

/// Total encoded length of the record starting at `rec[0]`.
///
/// Used by the page layer to bound a record whose slot only stores the
/// start offset.
#[must_use]
pub fn encoded_len(rec: &[u8]) -> usize {
    let n = n_fields(rec);
    let mut len = header_len(n);
    for i in 0..n {
        len += field_len(rec, i);
    }
    len
}

/// Borrow the `i`-th field payload.
#[must_use]
pub fn field(rec: &[u8], i: usize) -> &[u8] {
    let n = n_fields(rec);
    assert!(i < n, "field index {i} out of range ({n} fields)");
    let mut off = header_len(n);
    for j in 0..i {
        off += field_len(rec, j);
    }
    &rec[off..off + field_len(rec, i)]
}

#[inline]
#[must_use]
pub fn trx_id(rec: &[u8]) -> TrxId {
    let off = DIR_OFF + 2 * n_fields(rec);
    TrxId(u64::from_be_bytes(rec[off..off + 8].try_into().expect("8-byte trx id")))
}

#[inline]
#[must_use]
pub fn roll_ptr(rec: &[u8]) -> RollPtr {
    let off = DIR_OFF + 2 * n_fields(rec) + 8;
    RollPtr(u64::from_be_bytes(rec[off..off + 8].try_into().expect("8-byte roll ptr")))
}

/// Overwrite the trx id in place.
pub fn set_trx_id(rec: &mut [u8], id: TrxId) {
    let off = DIR_OFF + 2 * n_fields(rec);
    rec[off..off + 8].copy_from_slice(&id.0.to_be_bytes());
}

/// Overwrite the roll pointer in place.
pub fn set_roll_ptr(rec: &mut [u8], ptr: RollPtr) {
    let off = DIR_OFF + 2 * n_fields(rec) + 8;
    rec[off..off + 8].copy_from_slice(&ptr.0.to_be_bytes());
}

/// Set or clear the delete mark in place.
pub fn set_delete_marked(rec: &mut [u8], marked: bool) {
    if marked {
        rec[0] |= REC_INFO_DELETE_MARKED;
    } else {
        rec[0] &= !REC_INFO_DELETE_MARKED;
    }
}

/// Collect the field payloads of a record into owned buffers.
#[must_use]
pub fn fields_owned(rec: &[u8]) -> Vec<Vec<u8>> {
    (0..n_fields(rec)).map(|i| field(rec, i).to_vec()).collect()
}
