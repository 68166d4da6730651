#![forbid(unsafe_code)]

//! Deterministic content hashing of snapshots.
//!
//! All hashes here use a fixed-seed [`ahash::RandomState`] so the same
//! content produces the same hash in every process. This is what makes the
//! detector's hash short-circuit and the history log's before/after hashes
//! meaningful beyond a single run.
//!
//! Hashes are order-sensitive over columns then rows: reordering rows is a
//! content change.

use std::hash::{BuildHasher, Hasher};

use rxdata_model::{Row, Snapshot};

// Fixed seeds: content hashes must be stable across processes.
const SEED: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

fn hasher() -> impl Hasher {
    ahash::RandomState::with_seeds(SEED.0, SEED.1, SEED.2, SEED.3).build_hasher()
}

fn feed_row<H: Hasher>(row: &Row, h: &mut H) {
    h.write_usize(row.key.len());
    h.write(row.key.as_bytes());
    h.write_usize(row.cells.len());
    for cell in &row.cells {
        cell.feed_hash(h);
    }
}

/// Content hash of an entire snapshot: column names, then every row's key
/// and cells, in order.
#[must_use]
pub fn snapshot_hash(snapshot: &Snapshot) -> u64 {
    let mut h = hasher();
    h.write_usize(snapshot.columns().len());
    for column in snapshot.columns() {
        h.write_usize(column.len());
        h.write(column.as_bytes());
    }
    h.write_usize(snapshot.len());
    for row in snapshot.rows() {
        feed_row(row, &mut h);
    }
    h.finish()
}

/// Content hash of a contiguous run of rows (used for chunk tracking).
#[must_use]
pub fn rows_hash(rows: &[Row]) -> u64 {
    let mut h = hasher();
    h.write_usize(rows.len());
    for row in rows {
        feed_row(row, &mut h);
    }
    h.finish()
}

/// Content hash of one named column across all rows, keyed by row.
///
/// Returns `None` if the column does not exist. Two snapshots agree on a
/// column exactly when their column hashes agree (up to hash collision),
/// which is what the data source's cheap affected-keys pass relies on.
#[must_use]
pub fn column_hash(snapshot: &Snapshot, column: &str) -> Option<u64> {
    let col = snapshot.column_index(column)?;
    let mut h = hasher();
    h.write_usize(snapshot.len());
    for row in snapshot.rows() {
        h.write_usize(row.key.len());
        h.write(row.key.as_bytes());
        match row.cells.get(col) {
            Some(cell) => {
                h.write_u8(1);
                cell.feed_hash(&mut h);
            }
            // Malformed short row: hash the absence rather than failing.
            None => h.write_u8(0),
        }
    }
    Some(h.finish())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rxdata_model::Value;

    fn snapshot(pairs: &[(&str, i64)]) -> Snapshot {
        let mut s = Snapshot::new(vec!["value".into()]);
        for (k, v) in pairs {
            s.upsert_row(*k, vec![Value::Int(*v)]).unwrap();
        }
        s
    }

    #[test]
    fn equal_content_equal_hash() {
        let a = snapshot(&[("x", 1), ("y", 2)]);
        let b = snapshot(&[("x", 1), ("y", 2)]);
        assert_eq!(snapshot_hash(&a), snapshot_hash(&b));
    }

    #[test]
    fn row_order_is_significant() {
        let a = snapshot(&[("x", 1), ("y", 2)]);
        let b = snapshot(&[("y", 2), ("x", 1)]);
        assert_ne!(snapshot_hash(&a), snapshot_hash(&b));
    }

    #[test]
    fn single_cell_edit_changes_hash() {
        let a = snapshot(&[("x", 1), ("y", 2)]);
        let b = snapshot(&[("x", 1), ("y", 3)]);
        assert_ne!(snapshot_hash(&a), snapshot_hash(&b));
    }

    #[test]
    fn column_hash_tracks_only_its_column() {
        let mut a = Snapshot::new(vec!["v".into(), "w".into()]);
        a.upsert_row("r", vec![Value::Int(1), Value::Int(10)]).unwrap();
        let mut b = a.clone();
        b.upsert_row("r", vec![Value::Int(1), Value::Int(11)]).unwrap();

        assert_eq!(column_hash(&a, "v"), column_hash(&b, "v"));
        assert_ne!(column_hash(&a, "w"), column_hash(&b, "w"));
        assert_eq!(column_hash(&a, "missing"), None);
    }

    #[test]
    fn empty_snapshots_hash_equal() {
        assert_eq!(snapshot_hash(&Snapshot::empty()), snapshot_hash(&Snapshot::empty()));
    }
}
