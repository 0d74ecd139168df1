//! Undo records and rollback segments.
//!
//! An undo record is a flat byte image. The forward row operations
//! encode one per change; rollback copies records into the undo node's
//! arena and parses borrowed views out of it.
//!
//! A rollback segment ([`Rseg`]) stores the record images of the
//! transactions assigned to it. Record numbers index the segment, and
//! together with the segment id and the insert flag they form the packed
//! [`RollPtr`] stamped into each clustered index record. A record is
//! marked *consumed* when rollback claims it, either by popping the
//! transaction's roll list or by following a previous-version pointer;
//! consumed records are skipped by later pops so each is applied exactly
//! once.

use ironbase_mem::{Arena, ArenaRef};
use ironbase_types::{PageId, RollPtr, TableId, TrxId, UndoNo};
use parking_lot::Mutex;

const KIND_INSERT: u8 = 0;
const KIND_MODIFY: u8 = 1;

/// Parsed view of an undo record; field payloads borrow the arena copy.
#[derive(Debug, PartialEq, Eq)]
pub struct UndoRecView<'a> {
    pub undo_no: UndoNo,
    pub table_id: TableId,
    pub kind: UndoKind<'a>,
}

/// The operation a record reverses.
#[derive(Debug, PartialEq, Eq)]
pub enum UndoKind<'a> {
    /// Reversal removes the inserted row found by `ref_fields`.
    Insert { ref_fields: Vec<&'a [u8]> },
    /// Reversal restores the before-image: old header pair, old info
    /// bits, and the old values of the updated fields.
    Modify {
        ref_fields: Vec<&'a [u8]>,
        old_trx_id: TrxId,
        old_roll_ptr: RollPtr,
        old_info_bits: u8,
        update: Vec<(u16, &'a [u8])>,
    },
}

fn put_fields(buf: &mut Vec<u8>, fields: &[&[u8]]) {
    let n = u16::try_from(fields.len()).expect("field count fits in u16");
    buf.extend_from_slice(&n.to_be_bytes());
    for f in fields {
        let len = u16::try_from(f.len()).expect("field length fits in u16");
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(f);
    }
}

/// Encode an insert undo record.
#[must_use]
pub fn encode_insert(undo_no: UndoNo, table_id: TableId, ref_fields: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&undo_no.0.to_be_bytes());
    buf.extend_from_slice(&table_id.0.to_be_bytes());
    buf.push(KIND_INSERT);
    put_fields(&mut buf, ref_fields);
    buf
}

/// Encode a modify undo record (field update or delete-mark toggle).
#[must_use]
pub fn encode_modify(
    undo_no: UndoNo,
    table_id: TableId,
    ref_fields: &[&[u8]],
    old_trx_id: TrxId,
    old_roll_ptr: RollPtr,
    old_info_bits: u8,
    update: &[(u16, &[u8])],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&undo_no.0.to_be_bytes());
    buf.extend_from_slice(&table_id.0.to_be_bytes());
    buf.push(KIND_MODIFY);
    put_fields(&mut buf, ref_fields);
    buf.extend_from_slice(&old_trx_id.0.to_be_bytes());
    buf.extend_from_slice(&old_roll_ptr.0.to_be_bytes());
    buf.push(old_info_bits);
    let n = u16::try_from(update.len()).expect("update count fits in u16");
    buf.extend_from_slice(&n.to_be_bytes());
    for (field_no, old) in update {
        buf.extend_from_slice(&field_no.to_be_bytes());
        let len = u16::try_from(old.len()).expect("field length fits in u16");
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(old);
    }
    buf
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_be_bytes(self.buf[self.pos..self.pos + 8].try_into().expect("8 bytes"));
        self.pos += 8;
        v
    }

    fn bytes(&mut self, len: usize) -> &'a [u8] {
        let v = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        v
    }

    fn fields(&mut self) -> Vec<&'a [u8]> {
        let n = self.u16() as usize;
        (0..n)
            .map(|_| {
                let len = self.u16() as usize;
                self.bytes(len)
            })
            .collect()
    }
}

/// Parse an undo record image. A malformed image is undo-log corruption
/// and panics.
#[must_use]
pub fn parse(buf: &[u8]) -> UndoRecView<'_> {
    let mut r = Reader { buf, pos: 0 };
    let undo_no = UndoNo(r.u64());
    let table_id = TableId(r.u64());
    let kind = match r.u8() {
        KIND_INSERT => UndoKind::Insert { ref_fields: r.fields() },
        KIND_MODIFY => {
            let ref_fields = r.fields();
            let old_trx_id = TrxId(r.u64());
            let old_roll_ptr = RollPtr(r.u64());
            let old_info_bits = r.u8();
            let n = r.u16() as usize;
            let update = (0..n)
                .map(|_| {
                    let field_no = r.u16();
                    let len = r.u16() as usize;
                    (field_no, r.bytes(len))
                })
                .collect();
            UndoKind::Modify { ref_fields, old_trx_id, old_roll_ptr, old_info_bits, update }
        }
        k => panic!("unknown undo record kind {k}"),
    };
    UndoRecView { undo_no, table_id, kind }
}

/// The undo number of an encoded record, without a full parse.
#[must_use]
pub fn undo_rec_undo_no(buf: &[u8]) -> UndoNo {
    UndoNo(u64::from_be_bytes(buf[..8].try_into().expect("8-byte undo no")))
}

#[derive(Debug)]
struct UndoSlot {
    trx_id: TrxId,
    undo_no: UndoNo,
    consumed: bool,
    data: Vec<u8>,
}

/// A rollback segment: one stream of undo record images.
#[derive(Debug)]
pub struct Rseg {
    id: u8,
    /// Header page of the segment in the tablespace; bookkeeping only,
    /// record storage is in memory.
    page: PageId,
    inner: Mutex<Vec<UndoSlot>>,
}

impl Rseg {
    #[must_use]
    pub fn new(id: u8, page: PageId) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { id, page, inner: Mutex::new(Vec::new()) })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn page(&self) -> PageId {
        self.page
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Append a record image, returning its roll pointer.
    pub fn push(&self, trx_id: TrxId, undo_no: UndoNo, is_insert: bool, data: Vec<u8>) -> RollPtr {
        let mut slots = self.inner.lock();
        let rec_no = u32::try_from(slots.len()).expect("rseg record number fits in u32");
        slots.push(UndoSlot { trx_id, undo_no, consumed: false, data });
        RollPtr::new(is_insert, self.id, rec_no)
    }

    /// Copy a record image into `arena` without claiming it.
    #[must_use]
    pub fn read(&self, rec_no: u32, arena: &mut Arena) -> Option<ArenaRef> {
        let slots = self.inner.lock();
        slots.get(rec_no as usize).map(|s| arena.alloc(&s.data))
    }

    /// Copy a record image into `arena` and mark it consumed. Returns
    /// `None` if absent or already consumed.
    pub fn claim(&self, rec_no: u32, arena: &mut Arena) -> Option<ArenaRef> {
        let mut slots = self.inner.lock();
        let slot = slots.get_mut(rec_no as usize)?;
        if slot.consumed {
            return None;
        }
        slot.consumed = true;
        Some(arena.alloc(&slot.data))
    }

    #[must_use]
    pub fn is_consumed(&self, rec_no: u32) -> bool {
        self.inner.lock().get(rec_no as usize).map_or(true, |s| s.consumed)
    }

    /// `(trx_id, undo_no, consumed)` of a record, if present.
    #[must_use]
    pub fn slot_info(&self, rec_no: u32) -> Option<(TrxId, UndoNo, bool)> {
        self.inner.lock().get(rec_no as usize).map(|s| (s.trx_id, s.undo_no, s.consumed))
    }
}
