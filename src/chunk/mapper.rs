//! Answers requests against compressed records, decompressing only the
//! chunks a request touches.

use crate::chunk::codec::{ChunkCodec, ChunkDescriptor, CompressedRecord};
use crate::compression::Compression;
use crate::element::{dispatch_type, ArrayData, Element};
use crate::error::StorageError;
use crate::request::{Point, Request};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

/// Result of a request: values in request order and their x-first sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedArray {
    pub data: ArrayData,
    pub sizes: Vec<usize>,
}

/// Answer `request` against `record`
pub fn map_request<C: Compression>(
    codec: &ChunkCodec<C>,
    record: &CompressedRecord,
    request: &Request,
) -> Result<MappedArray, StorageError> {
    if let Request::All = request {
        return Ok(MappedArray {
            data: codec.assemble(record)?,
            sizes: record.extents.to_record_sizes(),
        });
    }

    let locator = ChunkLocator::new(record, request)?;
    let plan = request.plan(&record.extents.to_record_sizes())?;
    tracing::debug!(
        "Mapping {} request of {} point(s) over {} chunk(s)",
        request.name(),
        plan.points.len(),
        record.chunks.len()
    );

    let data = dispatch_type!(record.element_type, T => T::into_array(
        gather_points::<T, C>(codec, &locator, &plan.points)?
    ));
    Ok(MappedArray {
        data,
        sizes: plan.sizes,
    })
}

/// Indices of the chunks `request` touches
pub fn chunks_for_request(
    record: &CompressedRecord,
    request: &Request,
) -> Result<BTreeSet<usize>, StorageError> {
    if let Request::All = request {
        return Ok(record.chunks.iter().map(|c| c.index).collect());
    }
    let locator = ChunkLocator::new(record, request)?;
    let plan = request.plan(&record.extents.to_record_sizes())?;
    plan.points
        .iter()
        .enumerate()
        .map(|(i, p)| locator.locate(i, *p).map(|c| c.index))
        .collect()
}

struct ChunkLocator<'a> {
    record: &'a CompressedRecord,
    by_index: HashMap<usize, &'a ChunkDescriptor>,
    chunks_per_row: usize,
    precomputed: Option<&'a [usize]>,
}

impl<'a> ChunkLocator<'a> {
    fn new(record: &'a CompressedRecord, request: &Request) -> Result<Self, StorageError> {
        if record.extents.ndim() != 2 {
            return Err(StorageError::UnsupportedRequest(format!(
                "{} requests on compressed records need 2 dimensions, got {}",
                request.name(),
                record.extents.ndim()
            )));
        }
        record.check_tiling()?;
        let precomputed = match &record.chunk_indices {
            Some(indices) if !request.is_slab() && record.chunks.len() > 1 => {
                Some(indices.as_slice())
            }
            _ => None,
        };
        Ok(Self {
            record,
            by_index: record.chunks.iter().map(|c| (c.index, c)).collect(),
            chunks_per_row: record.extents.dims()[1].div_ceil(record.chunk_size),
            precomputed,
        })
    }

    /// Chunk holding the `position`-th requested point
    fn locate(&self, position: usize, point: Point) -> Result<&'a ChunkDescriptor, StorageError> {
        if let [only] = self.record.chunks.as_slice() {
            return Ok(only);
        }

        let row_major = [point.y, point.x];
        if let Some(&index) = self.precomputed.and_then(|p| p.get(position)) {
            match self.by_index.get(&index) {
                Some(chunk) if chunk.contains(&row_major) => return Ok(*chunk),
                _ => tracing::warn!(
                    "Ignoring precomputed chunk {} for point ({}, {})",
                    index,
                    point.x,
                    point.y
                ),
            }
        }

        let cs = self.record.chunk_size;
        let index = (point.y / cs) * self.chunks_per_row + point.x / cs;
        self.by_index
            .get(&index)
            .copied()
            .ok_or_else(|| StorageError::Corrupt(format!("chunk {} is missing", index)))
    }
}

fn gather_points<T: Element, C: Compression>(
    codec: &ChunkCodec<C>,
    locator: &ChunkLocator<'_>,
    points: &[Point],
) -> Result<Vec<T>, StorageError> {
    let mut decoded: HashMap<usize, Vec<T>> = HashMap::new();
    let mut out = Vec::with_capacity(points.len());

    for (position, &point) in points.iter().enumerate() {
        let chunk = locator.locate(position, point)?;
        let values = match decoded.entry(chunk.index) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(codec.decode_chunk::<T>(chunk)?),
        };
        if !chunk.contains(&[point.y, point.x]) {
            return Err(StorageError::Corrupt(format!(
                "chunk {} does not hold point ({}, {})",
                chunk.index, point.x, point.y
            )));
        }
        let dy = point.y - chunk.offsets[0];
        let dx = point.x - chunk.offsets[1];
        out.push(values[dy * chunk.sizes[1] + dx]);
    }

    tracing::debug!("Decompressed {} chunk(s) for {} point(s)", decoded.len(), points.len());
    Ok(out)
}
