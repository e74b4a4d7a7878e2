//! Combining incoming records with the value already stored under a key.

use crate::element::ArrayData;
use crate::error::StorageError;
use crate::record::{DataRecord, RecordData, StorageStatus, StorageValue, StoreOp};

/// Merged value plus what happened to each incoming record.
#[derive(Debug)]
pub struct MergeOutcome {
    pub value: StorageValue,
    pub status: StorageStatus,
}

/// Merge `incoming` into `previous` according to `op`.
///
/// Failures are reported per record in the status and never abort the rest
/// of the batch. Within a batch, the first record of a name wins under
/// [`StoreOp::StoreOnly`].
pub fn merge(
    previous: Option<StorageValue>,
    incoming: Vec<DataRecord>,
    op: StoreOp,
) -> MergeOutcome {
    let mut value = previous.unwrap_or_default();
    let mut status = StorageStatus::new(op);
    let mut index_of_append = vec![0; incoming.len()];

    for (position, record) in incoming.into_iter().enumerate() {
        if let Err(e) = record.validate() {
            status
                .exceptions
                .push(StorageError::invalid_record(record, e.to_string()));
            continue;
        }

        let result = match (op, value.contains(&record.name)) {
            (StoreOp::StoreOnly, true) => Err(StorageError::DuplicateRecord {
                name: record.name.clone(),
                record: Some(Box::new(record)),
            }),
            (StoreOp::Append, true) => append(&mut value, record).map(|index| {
                index_of_append[position] = index;
            }),
            (StoreOp::Append, false) => Err(StorageError::invalid_record(
                record,
                "cannot append to a record that does not exist",
            )),
            (StoreOp::Replace, true) if record.is_partial() => insert_partial(&mut value, record),
            (_, _) if record.is_partial() => expand_partial(record).map(|full| {
                value.insert(full);
            }),
            (_, _) => {
                value.insert(record);
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::debug!("Record rejected during {:?} merge: {}", op, e);
            status.exceptions.push(e);
        }
    }

    if op == StoreOp::Append {
        status.index_of_append = Some(index_of_append);
    }
    MergeOutcome { value, status }
}

/// Append along the slowest dimension; returns that dimension's previous size
fn append(value: &mut StorageValue, record: DataRecord) -> Result<usize, StorageError> {
    let Some(existing) = value.get_mut(&record.name) else {
        return Err(StorageError::invalid_record(record, "record does not exist"));
    };
    if record.is_compressed() || existing.is_compressed() {
        return Err(StorageError::invalid_record(
            record,
            "compressed records cannot be appended",
        ));
    }

    let n = existing.sizes.len();
    if record.sizes.len() != n || record.sizes[..n - 1] != existing.sizes[..n - 1] {
        let message = format!(
            "cannot append sizes {:?} to sizes {:?}",
            record.sizes, existing.sizes
        );
        return Err(StorageError::invalid_record(record, message));
    }

    let appended = match (&mut existing.data, &record.data) {
        (RecordData::Plain(stored), RecordData::Plain(incoming)) => stored.append(incoming),
        _ => Err(StorageError::Invariant("expected uncompressed records".to_string())),
    };
    if let Err(e) = appended {
        return Err(StorageError::invalid_record(record, e.to_string()));
    }

    let previous = existing.sizes[n - 1];
    existing.sizes[n - 1] += record.sizes[n - 1];
    Ok(previous)
}

/// Write a partial record into the stored record of the same name
fn insert_partial(value: &mut StorageValue, record: DataRecord) -> Result<(), StorageError> {
    let Some(existing) = value.get_mut(&record.name) else {
        return Err(StorageError::invalid_record(record, "record does not exist"));
    };
    if record.is_compressed() || existing.is_compressed() {
        return Err(StorageError::invalid_record(
            record,
            "partial writes need uncompressed records",
        ));
    }

    let origin = record.min_index.clone().unwrap_or_default();
    let inserted = match (&mut existing.data, &record.data) {
        (RecordData::Plain(stored), RecordData::Plain(window)) => {
            stored.insert_window(&existing.sizes, window, &record.sizes, &origin)
        }
        _ => Err(StorageError::Invariant("expected uncompressed records".to_string())),
    };
    inserted.map_err(|e| StorageError::invalid_record(record, e.to_string()))
}

/// Full-size record holding a partial record, the rest set to the fill value
fn expand_partial(record: DataRecord) -> Result<DataRecord, StorageError> {
    let Some(max_sizes) = record.max_sizes.clone() else {
        return Err(StorageError::invalid_record(
            record,
            "partial record without max sizes",
        ));
    };

    let total = max_sizes.iter().product();
    let origin = record.min_index.clone().unwrap_or_default();
    let expanded = match &record.data {
        RecordData::Plain(window) => {
            let mut full = ArrayData::filled(window.element_type(), total, record.fill_value);
            full.insert_window(&max_sizes, window, &record.sizes, &origin)
                .map(|()| full)
        }
        RecordData::Compressed(_) => Err(StorageError::InvalidRequest(
            "partial writes need uncompressed records".to_string(),
        )),
    };

    match expanded {
        Ok(full) => Ok(DataRecord {
            sizes: max_sizes,
            min_index: None,
            data: RecordData::Plain(full),
            ..record
        }),
        Err(e) => Err(StorageError::invalid_record(record, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_record(name: &str, values: Vec<i32>, sizes: Vec<usize>) -> DataRecord {
        DataRecord::new(name, "g", values, sizes)
    }

    #[test]
    fn store_only_keeps_first_of_duplicates() {
        let outcome = merge(
            None,
            vec![
                int_record("a", vec![1], vec![1]),
                int_record("b", vec![2], vec![1]),
                int_record("a", vec![3], vec![1]),
            ],
            StoreOp::StoreOnly,
        );
        assert_eq!(outcome.value.len(), 2);
        assert_eq!(
            outcome.value.get("a").and_then(|r| r.plain()),
            Some(&ArrayData::Int(vec![1]))
        );
        assert_eq!(outcome.status.exceptions.len(), 1);
        assert!(matches!(
            &outcome.status.exceptions[0],
            StorageError::DuplicateRecord { name, record: Some(_) } if name == "a"
        ));
    }

    #[test]
    fn replace_overwrites() {
        let previous = StorageValue::from_records(vec![int_record("a", vec![1, 2], vec![2])]);
        let outcome = merge(
            Some(previous),
            vec![int_record("a", vec![9], vec![1])],
            StoreOp::Replace,
        );
        assert!(outcome.status.exceptions.is_empty());
        let stored = outcome.value.get("a").unwrap();
        assert_eq!(stored.sizes, vec![1]);
        assert_eq!(stored.plain(), Some(&ArrayData::Int(vec![9])));
    }

    #[test]
    fn append_concatenates_and_reports_indices() {
        let previous = StorageValue::from_records(vec![
            int_record("a", vec![1, 2, 3, 4], vec![2, 2]),
            int_record("b", vec![5], vec![1]),
        ]);
        let outcome = merge(
            Some(previous),
            vec![
                int_record("b", vec![6, 7], vec![2]),
                int_record("a", vec![8, 9], vec![2, 1]),
            ],
            StoreOp::Append,
        );
        assert!(outcome.status.exceptions.is_empty());
        assert_eq!(outcome.status.index_of_append, Some(vec![1, 2]));

        let a = outcome.value.get("a").unwrap();
        assert_eq!(a.sizes, vec![2, 3]);
        assert_eq!(a.plain(), Some(&ArrayData::Int(vec![1, 2, 3, 4, 8, 9])));
    }

    #[test]
    fn append_rejects_missing_and_mismatched_records() {
        let previous = StorageValue::from_records(vec![int_record("a", vec![1, 2], vec![2, 1])]);
        let outcome = merge(
            Some(previous),
            vec![
                int_record("missing", vec![1], vec![1]),
                int_record("a", vec![1, 2, 3], vec![3, 1]),
                DataRecord::new("a", "g", vec![1.0f32, 2.0], vec![2, 1]),
            ],
            StoreOp::Append,
        );
        assert_eq!(outcome.status.exceptions.len(), 3);
        assert_eq!(outcome.value.get("a").unwrap().sizes, vec![2, 1]);
    }

    #[test]
    fn partial_record_is_expanded_with_fill_value() {
        let partial = int_record("p", vec![1, 2, 3, 4], vec![2, 2])
            .with_partial(vec![1, 1], vec![3, 3])
            .with_fill_value(-9.0);
        let outcome = merge(None, vec![partial], StoreOp::StoreOnly);
        assert!(outcome.status.exceptions.is_empty());

        let stored = outcome.value.get("p").unwrap();
        assert_eq!(stored.sizes, vec![3, 3]);
        assert!(!stored.is_partial());
        assert_eq!(
            stored.plain(),
            Some(&ArrayData::Int(vec![-9, -9, -9, -9, 1, 2, -9, 3, 4]))
        );
    }

    #[test]
    fn partial_replace_writes_into_existing() {
        let previous = StorageValue::from_records(vec![int_record("p", vec![0; 6], vec![3, 2])]);
        let partial = int_record("p", vec![7, 8], vec![2, 1]).with_partial(vec![1, 1], vec![3, 2]);
        let outcome = merge(Some(previous), vec![partial], StoreOp::Replace);
        assert!(outcome.status.exceptions.is_empty());
        assert_eq!(
            outcome.value.get("p").and_then(|r| r.plain()),
            Some(&ArrayData::Int(vec![0, 0, 0, 0, 7, 8]))
        );
    }

    #[test]
    fn invalid_records_are_reported() {
        let outcome = merge(
            None,
            vec![int_record("bad", vec![1, 2, 3], vec![2])],
            StoreOp::Replace,
        );
        assert!(outcome.value.is_empty());
        assert!(outcome.status.exceptions[0].record().is_some());
    }
}
