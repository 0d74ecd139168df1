//! Forward row operations on the clustered index.
//!
//! Each change stamps the record header with the acting transaction's id
//! and a roll pointer to the undo record logged for it, which is what
//! rollback later follows. Only the clustered index is maintained;
//! secondary index upkeep is outside the kernel.

use std::sync::Arc;

use ironbase_btree::{DTuple, LatchMode, PersistentCursor, SearchMode};
use ironbase_buf::Mtr;
use ironbase_error::{IronError, Result};
use ironbase_types::rec;

use crate::dict::Table;
use crate::sys::TrxSys;
use crate::trx::Trx;
use crate::undo;

/// Position `pcur` on the row with exactly `key`, if present.
fn position_on_row(
    pcur: &mut PersistentCursor,
    key: &DTuple,
    latch_mode: LatchMode,
    mtr: &mut Mtr,
) -> Result<bool> {
    pcur.open(key, SearchMode::LE, latch_mode, mtr)?;
    if !pcur.is_on_user_rec(mtr) {
        return Ok(false);
    }
    let index = Arc::clone(pcur.btr_cur().index());
    Ok(index.cmp_dtuple_rec(key, pcur.rec(mtr)) == std::cmp::Ordering::Equal)
}

fn key_of(table: &Table, fields: &[&[u8]]) -> DTuple {
    let n_uniq = table.clust_index().n_uniq() as usize;
    DTuple::from_slices(&fields[..n_uniq])
}

/// Insert a row. Logs an insert undo record keyed by the row reference.
pub fn insert_row(sys: &Arc<TrxSys>, trx: &Arc<Trx>, table: &Arc<Table>, fields: &[&[u8]]) -> Result<()> {
    let index = Arc::clone(table.clust_index());
    assert_eq!(fields.len(), index.n_fields() as usize, "field count mismatch");
    let key = key_of(table, fields);

    let mut mtr = Mtr::new();
    mtr.start();
    let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(sys.pool()));
    pcur.set_trx(trx.id());
    if position_on_row(&mut pcur, &key, LatchMode::ModifyLeaf, &mut mtr)? {
        return Err(IronError::DuplicateKey { index: index.name().to_owned() });
    }

    let undo_no = trx.assign_undo_no();
    let ref_fields: Vec<&[u8]> = key.fields().iter().map(Vec::as_slice).collect();
    let image = undo::encode_insert(undo_no, table.id(), &ref_fields);
    let roll_ptr = sys.append_undo_rec(trx, undo_no, true, image);

    let rec_bytes = rec::encode(fields, 0, trx.id(), roll_ptr);
    pcur.btr_cur_mut().insert(&rec_bytes, &mut mtr)?;
    mtr.commit();
    Ok(())
}

/// Update non-ordering fields of the row with `key`. Logs a modify undo
/// record carrying the before-image of every touched field and the old
/// record header.
pub fn update_row(
    sys: &Arc<TrxSys>,
    trx: &Arc<Trx>,
    table: &Arc<Table>,
    key: &DTuple,
    updates: &[(u16, &[u8])],
) -> Result<()> {
    let index = Arc::clone(table.clust_index());
    for (field_no, _) in updates {
        assert!(
            *field_no >= index.n_uniq() && *field_no < index.n_fields(),
            "ordering fields cannot be updated in place"
        );
    }

    let mut mtr = Mtr::new();
    mtr.start();
    let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(sys.pool()));
    pcur.set_trx(trx.id());
    if !position_on_row(&mut pcur, key, LatchMode::ModifyLeaf, &mut mtr)? {
        return Err(IronError::RecordNotFound { index: index.name().to_owned() });
    }

    let old_rec: Vec<u8> = pcur.rec(&mtr).to_vec();
    let old_values: Vec<(u16, &[u8])> =
        updates.iter().map(|(no, _)| (*no, rec::field(&old_rec, *no as usize))).collect();
    let ref_fields: Vec<&[u8]> = key.fields().iter().map(Vec::as_slice).collect();

    let undo_no = trx.assign_undo_no();
    let image = undo::encode_modify(
        undo_no,
        table.id(),
        &ref_fields,
        rec::trx_id(&old_rec),
        rec::roll_ptr(&old_rec),
        rec::info_bits(&old_rec),
        &old_values,
    );
    let roll_ptr = sys.append_undo_rec(trx, undo_no, false, image);

    let mut fields = rec::fields_owned(&old_rec);
    for (field_no, new_value) in updates {
        fields[*field_no as usize] = new_value.to_vec();
    }
    let field_slices: Vec<&[u8]> = fields.iter().map(Vec::as_slice).collect();
    let new_rec = rec::encode(&field_slices, rec::info_bits(&old_rec), trx.id(), roll_ptr);
    pcur.btr_cur_mut().update(&new_rec, &mut mtr)?;
    mtr.commit();
    Ok(())
}

/// Delete-mark the row with `key`. The record stays in place; purge (not
/// part of the kernel) removes it once no one needs the version.
pub fn delete_mark_row(sys: &Arc<TrxSys>, trx: &Arc<Trx>, table: &Arc<Table>, key: &DTuple) -> Result<()> {
    let index = Arc::clone(table.clust_index());
    let mut mtr = Mtr::new();
    mtr.start();
    let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(sys.pool()));
    pcur.set_trx(trx.id());
    if !position_on_row(&mut pcur, key, LatchMode::ModifyLeaf, &mut mtr)? {
        return Err(IronError::RecordNotFound { index: index.name().to_owned() });
    }
    let old_rec: Vec<u8> = pcur.rec(&mtr).to_vec();
    if rec::is_delete_marked(&old_rec) {
        return Err(IronError::RecordNotFound { index: index.name().to_owned() });
    }
    let ref_fields: Vec<&[u8]> = key.fields().iter().map(Vec::as_slice).collect();

    let undo_no = trx.assign_undo_no();
    let image = undo::encode_modify(
        undo_no,
        table.id(),
        &ref_fields,
        rec::trx_id(&old_rec),
        rec::roll_ptr(&old_rec),
        rec::info_bits(&old_rec),
        &[],
    );
    let roll_ptr = sys.append_undo_rec(trx, undo_no, false, image);

    let mut new_rec = old_rec;
    rec::set_delete_marked(&mut new_rec, true);
    rec::set_trx_id(&mut new_rec, trx.id());
    rec::set_roll_ptr(&mut new_rec, roll_ptr);
    pcur.btr_cur_mut().update(&new_rec, &mut mtr)?;
    mtr.commit();
    Ok(())
}

/// Read the latest version of the row with `key`: its field payloads, or
/// `None` when absent or delete-marked. No multi-version visibility is
/// applied.
pub fn read_row(sys: &Arc<TrxSys>, table: &Arc<Table>, key: &DTuple) -> Result<Option<Vec<Vec<u8>>>> {
    let index = Arc::clone(table.clust_index());
    let mut mtr = Mtr::new();
    mtr.start();
    let mut pcur = PersistentCursor::new(index, Arc::clone(sys.pool()));
    let found = position_on_row(&mut pcur, key, LatchMode::SearchLeaf, &mut mtr)?;
    let row = if found {
        let record = pcur.rec(&mtr);
        if rec::is_delete_marked(record) {
            None
        } else {
            Some(rec::fields_owned(record))
        }
    } else {
        None
    };
    mtr.commit();
    Ok(row)
}
