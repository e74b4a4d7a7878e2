use crate::chunk::{map_request, ArrayExtents, ChunkCodec, CompressedRecord};
use crate::compression::Compression;
use crate::element::{ArrayData, ElementType};
use crate::error::StorageError;
use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque caller object attached to a record; never sent to the cache
pub type Correlation = Arc<dyn Any + Send + Sync>;

/// Cache key: the file path plus the group inside it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub path: String,
    pub group: String,
}

impl StorageKey {
    pub fn new(path: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.path, self.group)
    }
}

/// How a store combines incoming records with stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOp {
    StoreOnly,
    Replace,
    Append,
}

/// Per-record storage options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProperties {
    /// Chunk and compress the data before it is stored
    pub compress: bool,
    /// Overrides the store's chunk size
    pub chunk_size: Option<usize>,
}

/// Payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordData {
    Plain(ArrayData),
    Compressed(CompressedRecord),
}

/// A named, typed array inside a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    pub name: String,
    pub group: String,
    /// Sizes with the fastest-varying dimension first
    pub sizes: Vec<usize>,
    /// Full sizes of the array a partial record belongs to
    pub max_sizes: Option<Vec<usize>>,
    /// Origin of a partial record inside the full array
    pub min_index: Option<Vec<usize>>,
    pub fill_value: f64,
    pub attributes: BTreeMap<String, String>,
    pub properties: StorageProperties,
    pub data: RecordData,
    #[serde(skip)]
    pub correlation: Option<Correlation>,
}

impl DataRecord {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        data: impl Into<ArrayData>,
        sizes: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            sizes,
            max_sizes: None,
            min_index: None,
            fill_value: 0.0,
            attributes: BTreeMap::new(),
            properties: StorageProperties::default(),
            data: RecordData::Plain(data.into()),
            correlation: None,
        }
    }

    pub fn with_partial(mut self, min_index: Vec<usize>, max_sizes: Vec<usize>) -> Self {
        self.min_index = Some(min_index);
        self.max_sizes = Some(max_sizes);
        self
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_compression(mut self, chunk_size: Option<usize>) -> Self {
        self.properties = StorageProperties {
            compress: true,
            chunk_size,
        };
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Whether this record carries a window of a larger array
    pub fn is_partial(&self) -> bool {
        self.min_index.is_some()
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.data, RecordData::Compressed(_))
    }

    pub fn element_type(&self) -> ElementType {
        match &self.data {
            RecordData::Plain(data) => data.element_type(),
            RecordData::Compressed(record) => record.element_type,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match &self.data {
            RecordData::Plain(data) => data.size_in_bytes(),
            RecordData::Compressed(record) => record.compressed_size(),
        }
    }

    /// Plain data, if the record is not compressed
    pub fn plain(&self) -> Option<&ArrayData> {
        match &self.data {
            RecordData::Plain(data) => Some(data),
            RecordData::Compressed(_) => None,
        }
    }

    /// Check that the payload matches the sizes
    pub fn validate(&self) -> Result<(), StorageError> {
        let expected: usize = self.sizes.iter().product();
        let actual = match &self.data {
            RecordData::Plain(data) => data.len(),
            RecordData::Compressed(record) => record.num_elements(),
        };
        if self.sizes.is_empty() || actual != expected {
            return Err(StorageError::InvalidRecord {
                name: self.name.clone(),
                message: format!("{} values do not match sizes {:?}", actual, self.sizes),
                record: None,
            });
        }
        if let RecordData::Compressed(record) = &self.data {
            record
                .check_tiling()
                .map_err(|e| StorageError::InvalidRecord {
                    name: self.name.clone(),
                    message: e.to_string(),
                    record: None,
                })?;
        }
        Ok(())
    }

    /// Chunk and compress the payload in place; compressed records are left as is
    pub fn compress<C: Compression>(&mut self, codec: &ChunkCodec<C>) -> Result<(), StorageError> {
        if let RecordData::Plain(data) = &self.data {
            let extents = ArrayExtents::from_record_sizes(&self.sizes)?;
            let compressed = codec.forward(data, &extents)?;
            tracing::debug!(
                "Compressed record {} from {}B to {}B",
                self.name,
                data.size_in_bytes(),
                compressed.compressed_size()
            );
            self.data = RecordData::Compressed(compressed);
        }
        Ok(())
    }

    /// Copy holding only the data `request` selects, uncompressed
    pub fn materialize<C: Compression>(
        &self,
        request: &Request,
        codec: &ChunkCodec<C>,
    ) -> Result<Self, StorageError> {
        let (data, sizes) = match &self.data {
            RecordData::Plain(data) => request.apply(data, &self.sizes)?,
            RecordData::Compressed(record) => {
                let mapped = map_request(codec, record, request)?;
                (mapped.data, mapped.sizes)
            }
        };
        Ok(Self {
            name: self.name.clone(),
            group: self.group.clone(),
            sizes,
            max_sizes: self.max_sizes.clone(),
            min_index: None,
            fill_value: self.fill_value,
            attributes: self.attributes.clone(),
            properties: self.properties.clone(),
            data: RecordData::Plain(data),
            correlation: self.correlation.clone(),
        })
    }
}

/// The records stored under one key, unique by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageValue {
    records: Vec<DataRecord>,
}

impl StorageValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value holding `records`; later records replace earlier ones of the same name
    pub fn from_records(records: impl IntoIterator<Item = DataRecord>) -> Self {
        let mut value = Self::new();
        for record in records {
            value.insert(record);
        }
        value
    }

    pub fn records(&self) -> &[DataRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<DataRecord> {
        self.records
    }

    pub fn get(&self, name: &str) -> Option<&DataRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DataRecord> {
        self.records.iter_mut().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace by name, keeping the position of a replaced record
    pub fn insert(&mut self, record: DataRecord) -> Option<DataRecord> {
        match self.get_mut(&record.name) {
            Some(existing) => Some(std::mem::replace(existing, record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<DataRecord> {
        let position = self.records.iter().position(|r| r.name == name)?;
        Some(self.records.remove(position))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.records.iter().map(|r| r.size_in_bytes()).sum()
    }
}

/// Outcome of a store call.
#[derive(Debug, Serialize, Deserialize)]
pub struct StorageStatus {
    pub operation: StoreOp,
    pub exceptions: Vec<StorageError>,
    /// Previous slowest-dimension size of each appended record, by position
    pub index_of_append: Option<Vec<usize>>,
}

impl StorageStatus {
    pub fn new(operation: StoreOp) -> Self {
        Self {
            operation,
            exceptions: Vec::new(),
            index_of_append: None,
        }
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    /// Fold another status into this one
    pub fn absorb(&mut self, other: StorageStatus) {
        self.exceptions.extend(other.exceptions);
        if let Some(indices) = other.index_of_append {
            self.index_of_append
                .get_or_insert_with(Vec::new)
                .extend(indices);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Point;

    #[test]
    fn keys_order_by_path_then_group() {
        let mut keys = vec![
            StorageKey::new("b.h5", "a"),
            StorageKey::new("a.h5", "z"),
            StorageKey::new("a.h5", ""),
        ];
        keys.sort();
        assert_eq!(keys[0], StorageKey::new("a.h5", ""));
        assert_eq!(keys[2], StorageKey::new("b.h5", "a"));
    }

    #[test]
    fn value_names_are_unique() {
        let mut value = StorageValue::new();
        value.insert(DataRecord::new("t", "g", vec![1i32], vec![1]));
        value.insert(DataRecord::new("p", "g", vec![2i32], vec![1]));
        let replaced = value.insert(DataRecord::new("t", "g", vec![3i32], vec![1]));
        assert!(replaced.is_some());
        assert_eq!(value.len(), 2);
        assert_eq!(value.names().collect::<Vec<_>>(), vec!["t", "p"]);
        assert_eq!(
            value.get("t").and_then(|r| r.plain()),
            Some(&ArrayData::Int(vec![3]))
        );
    }

    #[test]
    fn compressed_and_plain_records_materialize_alike() {
        let data: Vec<f32> = (0..600).map(|v| v as f32).collect();
        let plain = DataRecord::new("temp", "grid", data, vec![30, 20]);
        let codec = ChunkCodec::new(8).unwrap();
        let mut compressed = plain.clone();
        compressed.compress(&codec).unwrap();
        assert!(compressed.is_compressed());

        let request = Request::Slab {
            min: Point::new(5, 3),
            max: Point::new(25, 17),
        };
        let a = plain.materialize(&request, &codec).unwrap();
        let b = compressed.materialize(&request, &codec).unwrap();
        assert_eq!(a.sizes, vec![20, 14]);
        assert_eq!(a.sizes, b.sizes);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn validate_checks_sizes() {
        assert!(DataRecord::new("a", "g", vec![1i8, 2], vec![2]).validate().is_ok());
        assert!(DataRecord::new("a", "g", vec![1i8, 2], vec![3]).validate().is_err());
    }

    #[test]
    fn validate_checks_chunk_tiling() {
        let codec = ChunkCodec::new(2).unwrap();
        let mut record = DataRecord::new("a", "g", vec![1i16; 16], vec![4, 4]);
        record.compress(&codec).unwrap();
        assert!(record.validate().is_ok());

        if let RecordData::Compressed(compressed) = &mut record.data {
            compressed.chunk_size = 0;
        }
        assert!(matches!(
            record.validate(),
            Err(StorageError::InvalidRecord { .. })
        ));
    }
}
