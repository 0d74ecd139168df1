//! Index descriptor and the record comparator surface.

use std::cmp::Ordering;
use std::sync::Arc;

use ironbase_types::{rec, IndexId, PageId, PageNo, RollPtr, SpaceId, TrxId};
use parking_lot::RwLock;

/// Search mode for cursor positioning.
///
/// The cursor lands ON the record the mode describes, or on a sentinel
/// when no record qualifies:
///
/// - `L`: greatest record `< key`, else infimum.
/// - `LE`: greatest record `<= key`, else infimum.
/// - `GE`: least record `>= key`, else supremum.
/// - `G`: least record `> key`, else supremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    L,
    LE,
    GE,
    G,
}

/// A search key: decoded field payloads, compared field-wise bytewise.
///
/// A tuple with fewer fields than the index's order prefix compares as a
/// prefix: it is Equal to any record it prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DTuple {
    fields: Vec<Vec<u8>>,
}

impl DTuple {
    #[must_use]
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn from_slices(fields: &[&[u8]]) -> Self {
        Self { fields: fields.iter().map(|f| f.to_vec()).collect() }
    }

    #[inline]
    #[must_use]
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn field(&self, i: usize) -> &[u8] {
        &self.fields[i]
    }

    #[must_use]
    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }
}

/// An index descriptor: identity, tree location, and field counts.
///
/// `n_uniq` is the number of leading fields that order the index (the
/// order prefix); `n_fields` is the full stored field count. The tree
/// latch serializes structure modifications: searches hold it shared,
/// page unlinking holds it exclusive.
#[derive(Debug)]
pub struct Index {
    id: IndexId,
    name: String,
    space: SpaceId,
    root: PageNo,
    n_fields: u16,
    n_uniq: u16,
    latch: Arc<RwLock<()>>,
}

impl Index {
    #[must_use]
    pub fn new(
        id: IndexId,
        name: impl Into<String>,
        space: SpaceId,
        root: PageNo,
        n_fields: u16,
        n_uniq: u16,
    ) -> Arc<Self> {
        assert!(n_uniq >= 1 && n_uniq <= n_fields, "order prefix must be 1..=n_fields");
        Arc::new(Self {
            id,
            name: name.into(),
            space,
            root,
            n_fields,
            n_uniq,
            latch: Arc::new(RwLock::new(())),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> PageNo {
        self.root
    }

    #[inline]
    #[must_use]
    pub fn root_id(&self) -> PageId {
        PageId::new(self.space, self.root)
    }

    #[inline]
    #[must_use]
    pub fn n_fields(&self) -> u16 {
        self.n_fields
    }

    #[inline]
    #[must_use]
    pub fn n_uniq(&self) -> u16 {
        self.n_uniq
    }

    /// The index tree latch.
    #[must_use]
    pub fn latch(&self) -> &Arc<RwLock<()>> {
        &self.latch
    }

    /// Copy the order prefix of `rec` into `buf` as a standalone prefix
    /// record. Returns the number of fields copied.
    ///
    /// The buffer is reused across calls; this is the allocation the
    /// persistent cursor amortizes over store/restore cycles.
    pub fn copy_rec_order_prefix(&self, source: &[u8], buf: &mut Vec<u8>) -> u16 {
        let n = self.n_uniq;
        let fields: Vec<&[u8]> = (0..n as usize).map(|i| rec::field(source, i)).collect();
        buf.clear();
        rec::encode_into(buf, &fields, 0, TrxId(0), RollPtr::NULL);
        n
    }

    /// Build a search tuple from the first `n_fields` fields of a prefix
    /// record produced by [`Index::copy_rec_order_prefix`].
    #[must_use]
    pub fn build_data_tuple(&self, prefix_rec: &[u8], n_fields: u16) -> DTuple {
        assert!(n_fields >= 1, "empty search tuple");
        let fields = (0..n_fields as usize).map(|i| rec::field(prefix_rec, i).to_vec()).collect();
        DTuple::new(fields)
    }

    /// Compare a search tuple against a record, prefix semantics.
    #[must_use]
    pub fn cmp_dtuple_rec(&self, tuple: &DTuple, record: &[u8]) -> Ordering {
        let n = tuple.n_fields().min(rec::n_fields(record));
        for i in 0..n {
            let ord = tuple.field(i).cmp(rec::field(record, i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compare the first `n_fields` fields of two records.
    #[must_use]
    pub fn cmp_rec_rec(&self, a: &[u8], b: &[u8], n_fields: u16) -> Ordering {
        let n = (n_fields as usize).min(rec::n_fields(a)).min(rec::n_fields(b));
        for i in 0..n {
            let ord = rec::field(a, i).cmp(rec::field(b, i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> Arc<Index> {
        Index::new(IndexId(1), "pk", SpaceId(0), PageNo(10), 3, 1)
    }

    fn record(key: &[u8], rest: &[&[u8]]) -> Vec<u8> {
        let mut fields = vec![key];
        fields.extend_from_slice(rest);
        rec::encode(&fields, 0, TrxId(5), RollPtr::NULL)
    }

    #[test]
    fn order_prefix_round_trip() {
        let idx = index();
        let r = record(b"key1", &[b"v1", b"v2"]);
        let mut buf = Vec::new();
        let n = idx.copy_rec_order_prefix(&r, &mut buf);
        assert_eq!(n, 1);
        assert_eq!(rec::n_fields(&buf), 1);
        assert_eq!(rec::field(&buf, 0), b"key1");

        let tuple = idx.build_data_tuple(&buf, n);
        assert_eq!(tuple.n_fields(), 1);
        assert_eq!(idx.cmp_dtuple_rec(&tuple, &r), Ordering::Equal);
    }

    #[test]
    fn tuple_ordering_is_bytewise() {
        let idx = index();
        let r = record(b"bb", &[b"", b""]);
        assert_eq!(idx.cmp_dtuple_rec(&DTuple::from_slices(&[b"aa"]), &r), Ordering::Less);
        assert_eq!(idx.cmp_dtuple_rec(&DTuple::from_slices(&[b"bb"]), &r), Ordering::Equal);
        assert_eq!(idx.cmp_dtuple_rec(&DTuple::from_slices(&[b"bc"]), &r), Ordering::Greater);
        // Shorter field payloads order first.
        assert_eq!(idx.cmp_dtuple_rec(&DTuple::from_slices(&[b"b"]), &r), Ordering::Less);
    }

    #[test]
    fn rec_rec_comparison_respects_field_count() {
        let idx = index();
        let a = record(b"k", &[b"x", b"1"]);
        let b = record(b"k", &[b"y", b"2"]);
        assert_eq!(idx.cmp_rec_rec(&a, &b, 1), Ordering::Equal);
        assert_eq!(idx.cmp_rec_rec(&a, &b, 2), Ordering::Less);
    }

    #[test]
    #[should_panic(expected = "order prefix")]
    fn zero_uniq_fields_rejected() {
        let _ = Index::new(IndexId(1), "bad", SpaceId(0), PageNo(1), 2, 0);
    }
}
