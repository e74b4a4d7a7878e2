//! Server-side entry processors.
//!
//! Each invocation names a processor, carries the protocol version, and holds
//! its arguments serialized with bincode. The cache runs [`execute`] against
//! the entry for one key, atomically, and ships the encoded result back; the
//! client decodes it with [`decode_response`].

use crate::chunk::ChunkCodec;
use crate::error::{CacheError, StorageError};
use crate::merge::merge;
use crate::record::{DataRecord, StorageKey, StorageStatus, StorageValue, StoreOp};
use crate::request::Request;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Version of the invocation encoding
pub const PROTOCOL_VERSION: u16 = 1;

/// Processors the cache can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    Store,
    Retrieve,
    DatasetNames,
    DeleteDatasets,
}

/// A processor call shipped to the node owning a key.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub op: OpCode,
    pub version: u16,
    pub args: Bytes,
}

#[derive(Serialize, Deserialize)]
struct StoreArgs {
    op: StoreOp,
    records: Vec<DataRecord>,
}

#[derive(Serialize, Deserialize)]
struct RetrieveArgs {
    datasets: Option<BTreeSet<String>>,
    request: Request,
}

#[derive(Serialize, Deserialize)]
struct DeleteArgs {
    datasets: BTreeSet<String>,
}

impl Invocation {
    fn encode<A: Serialize>(op: OpCode, args: &A) -> Result<Self, StorageError> {
        Ok(Self {
            op,
            version: PROTOCOL_VERSION,
            args: Bytes::from(bincode::serialize(args)?),
        })
    }

    /// Merge `records` into the entry; answers a [`StorageStatus`]
    pub fn store(op: StoreOp, records: Vec<DataRecord>) -> Result<Self, StorageError> {
        Self::encode(OpCode::Store, &StoreArgs { op, records })
    }

    /// Read records, all of them when `datasets` is `None`; answers `Vec<DataRecord>`
    pub fn retrieve(
        datasets: Option<BTreeSet<String>>,
        request: Request,
    ) -> Result<Self, StorageError> {
        Self::encode(OpCode::Retrieve, &RetrieveArgs { datasets, request })
    }

    /// List record names; answers `Vec<String>`
    pub fn dataset_names() -> Result<Self, StorageError> {
        Self::encode(OpCode::DatasetNames, &())
    }

    /// Drop records by name; answers `Vec<String>` of the names removed
    pub fn delete_datasets(datasets: BTreeSet<String>) -> Result<Self, StorageError> {
        Self::encode(OpCode::DeleteDatasets, &DeleteArgs { datasets })
    }
}

/// Run `invocation` against the entry stored under `key`.
///
/// Processor failures are encoded into the response. The error case is
/// reserved for responses that cannot be encoded at all.
pub fn execute(
    key: &StorageKey,
    invocation: &Invocation,
    entry: &mut Option<StorageValue>,
) -> Result<Bytes, CacheError> {
    let bytes = match invocation.op {
        OpCode::Store => respond(run(invocation, |args: StoreArgs| {
            Ok(store(entry, args))
        })),
        OpCode::Retrieve => respond(run(invocation, |args: RetrieveArgs| {
            retrieve(key, entry.as_ref(), args)
        })),
        OpCode::DatasetNames => respond(run(invocation, |()| {
            Ok(entry
                .as_ref()
                .map(|value| value.names().map(str::to_string).collect::<Vec<_>>())
                .unwrap_or_default())
        })),
        OpCode::DeleteDatasets => respond(run(invocation, |args: DeleteArgs| {
            Ok(delete(entry, args))
        })),
    }?;
    Ok(Bytes::from(bytes))
}

/// Decode the response of an invocation
pub fn decode_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize::<Result<T, StorageError>>(bytes)?
}

fn run<A, T>(
    invocation: &Invocation,
    process: impl FnOnce(A) -> Result<T, StorageError>,
) -> Result<T, StorageError>
where
    A: DeserializeOwned,
{
    if invocation.version != PROTOCOL_VERSION {
        return Err(StorageError::Protocol(format!(
            "{:?} invocation has version {}, expected {}",
            invocation.op, invocation.version, PROTOCOL_VERSION
        )));
    }
    let args = bincode::deserialize(&invocation.args)?;
    process(args)
}

fn respond<T: Serialize>(result: Result<T, StorageError>) -> Result<Vec<u8>, CacheError> {
    Ok(bincode::serialize(&result)?)
}

fn store(entry: &mut Option<StorageValue>, args: StoreArgs) -> StorageStatus {
    let outcome = merge(entry.take(), args.records, args.op);
    if !outcome.value.is_empty() {
        *entry = Some(outcome.value);
    }
    outcome.status
}

fn retrieve(
    key: &StorageKey,
    entry: Option<&StorageValue>,
    args: RetrieveArgs,
) -> Result<Vec<DataRecord>, StorageError> {
    let value = entry.ok_or_else(|| StorageError::NotFound(key.to_string()))?;
    let codec = ChunkCodec::default();
    value
        .records()
        .iter()
        .filter(|r| {
            args.datasets
                .as_ref()
                .map_or(true, |names| names.contains(&r.name))
        })
        .map(|r| r.materialize(&args.request, &codec))
        .collect()
}

fn delete(entry: &mut Option<StorageValue>, args: DeleteArgs) -> Vec<String> {
    let Some(value) = entry.as_mut() else {
        return Vec::new();
    };
    let removed = args
        .datasets
        .iter()
        .filter_map(|name| value.remove(name).map(|r| r.name))
        .collect();
    if value.is_empty() {
        *entry = None;
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ArrayData;

    fn key() -> StorageKey {
        StorageKey::new("/data/file.h5", "group")
    }

    #[test]
    fn store_then_retrieve() {
        let mut entry = None;
        let invocation = Invocation::store(
            StoreOp::StoreOnly,
            vec![DataRecord::new("a", "group", vec![1i16, 2, 3], vec![3])],
        )
        .unwrap();
        let status: StorageStatus =
            decode_response(&execute(&key(), &invocation, &mut entry).unwrap()).unwrap();
        assert!(status.exceptions.is_empty());
        assert!(entry.is_some());

        let invocation = Invocation::retrieve(None, Request::All).unwrap();
        let records: Vec<DataRecord> =
            decode_response(&execute(&key(), &invocation, &mut entry).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].plain(), Some(&ArrayData::Short(vec![1, 2, 3])));
    }

    #[test]
    fn retrieve_missing_entry_is_not_found() {
        let invocation = Invocation::retrieve(None, Request::All).unwrap();
        let result: Result<Vec<DataRecord>, _> =
            decode_response(&execute(&key(), &invocation, &mut None).unwrap());
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut invocation = Invocation::dataset_names().unwrap();
        invocation.version = PROTOCOL_VERSION + 1;
        let result: Result<Vec<String>, _> =
            decode_response(&execute(&key(), &invocation, &mut None).unwrap());
        assert!(matches!(result, Err(StorageError::Protocol(_))));
    }

    #[test]
    fn deleting_last_dataset_clears_entry() {
        let mut entry = Some(StorageValue::from_records(vec![DataRecord::new(
            "a",
            "group",
            vec![1i8],
            vec![1],
        )]));
        let invocation = Invocation::delete_datasets(["a".to_string()].into()).unwrap();
        let removed: Vec<String> =
            decode_response(&execute(&key(), &invocation, &mut entry).unwrap()).unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
        assert!(entry.is_none());
    }
}
