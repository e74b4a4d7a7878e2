use crate::chunk::layout::{for_each_run, ArrayExtents, ChunkLayout, ChunkWindow};
use crate::compression::{Compression, DeflateCompression};
use crate::element::{dispatch_array, dispatch_type, ArrayData, Element, ElementType};
use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default edge length of a chunk
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// One independently compressed chunk of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub index: usize,
    /// Row-major sizes of the chunk window
    pub sizes: Vec<usize>,
    /// Row-major origin of the chunk window
    pub offsets: Vec<usize>,
    pub compressed: Vec<u8>,
}

impl ChunkDescriptor {
    pub fn window(&self) -> ChunkWindow {
        ChunkWindow {
            sizes: self.sizes.clone(),
            offsets: self.offsets.clone(),
        }
    }

    pub fn num_elements(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Whether the row-major `point` lies inside this chunk
    pub fn contains(&self, point: &[usize]) -> bool {
        ChunkWindow::holds(&self.offsets, &self.sizes, point)
    }

    fn matches(&self, window: &ChunkWindow) -> bool {
        self.sizes == window.sizes && self.offsets == window.offsets
    }
}

/// An array stored as a tiling of compressed chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedRecord {
    pub element_type: ElementType,
    pub extents: ArrayExtents,
    pub chunk_size: usize,
    /// Chunks in tiling order
    pub chunks: Vec<ChunkDescriptor>,
    /// Owning chunk of each requested point, in point order, when known
    pub chunk_indices: Option<Vec<usize>>,
}

impl CompressedRecord {
    pub fn num_elements(&self) -> usize {
        self.extents.num_elements()
    }

    pub fn compressed_size(&self) -> usize {
        self.chunks.iter().map(|c| c.compressed.len()).sum()
    }

    pub fn layout(&self) -> Result<ChunkLayout, StorageError> {
        ChunkLayout::new(self.extents.clone(), self.chunk_size)
    }

    /// Check that the chunks are either one chunk covering the whole array
    /// or exactly the regular tiling for `chunk_size`
    pub fn check_tiling(&self) -> Result<(), StorageError> {
        if self.chunk_size == 0 {
            return Err(StorageError::Corrupt("chunk size is zero".to_string()));
        }
        let whole = ChunkWindow {
            sizes: self.extents.dims().to_vec(),
            offsets: vec![0; self.extents.ndim()],
        };
        if let [only] = self.chunks.as_slice() {
            if only.matches(&whole) {
                return Ok(());
            }
        }

        let layout = self.layout()?;
        if self.chunks.len() != layout.num_chunks() {
            return Err(StorageError::Corrupt(format!(
                "{} chunk(s) do not tile extents {:?} with chunk size {}",
                self.chunks.len(),
                self.extents.dims(),
                self.chunk_size
            )));
        }
        for (position, (chunk, window)) in self.chunks.iter().zip(layout.windows()).enumerate() {
            if chunk.index != position || !chunk.matches(&window) {
                return Err(StorageError::Corrupt(format!(
                    "chunk {} at position {} is not tile {:?}",
                    chunk.index, position, window
                )));
            }
        }
        Ok(())
    }
}

/// Splits arrays into compressed chunks and back.
#[derive(Debug, Clone)]
pub struct ChunkCodec<C: Compression = DeflateCompression> {
    chunk_size: usize,
    compression: C,
}

impl ChunkCodec<DeflateCompression> {
    pub fn new(chunk_size: usize) -> Result<Self, StorageError> {
        Self::with_compression(chunk_size, DeflateCompression::fastest())
    }
}

impl Default for ChunkCodec<DeflateCompression> {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: DeflateCompression::fastest(),
        }
    }
}

impl<C: Compression> ChunkCodec<C> {
    pub fn with_compression(chunk_size: usize, compression: C) -> Result<Self, StorageError> {
        if chunk_size == 0 {
            return Err(StorageError::InvalidRequest(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self {
            chunk_size,
            compression,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compress `data`, laid out row-major over `extents`. Arrays of at most
    /// `chunk_size²` elements become a single chunk.
    pub fn forward(
        &self,
        data: &ArrayData,
        extents: &ArrayExtents,
    ) -> Result<CompressedRecord, StorageError> {
        if data.len() <= self.chunk_size * self.chunk_size {
            let window = ChunkWindow {
                sizes: extents.dims().to_vec(),
                offsets: vec![0; extents.ndim()],
            };
            return self.encode(data, extents, std::iter::once(window));
        }
        self.tile(data, extents)
    }

    /// Compress `data` as a full tiling, however small it is
    pub fn tile(
        &self,
        data: &ArrayData,
        extents: &ArrayExtents,
    ) -> Result<CompressedRecord, StorageError> {
        let layout = ChunkLayout::new(extents.clone(), self.chunk_size)?;
        self.encode(data, extents, layout.windows())
    }

    fn encode(
        &self,
        data: &ArrayData,
        extents: &ArrayExtents,
        windows: impl Iterator<Item = ChunkWindow>,
    ) -> Result<CompressedRecord, StorageError> {
        if data.len() != extents.num_elements() {
            return Err(StorageError::InvalidRequest(format!(
                "array holds {} values but extents {:?} need {}",
                data.len(),
                extents.dims(),
                extents.num_elements()
            )));
        }

        let chunks = dispatch_array!(data, values => windows
            .enumerate()
            .map(|(index, window)| self.encode_window(values, extents, index, window))
            .collect::<Result<Vec<_>, _>>())?;

        tracing::debug!(
            "Compressed {} values of {:?} into {} chunk(s)",
            data.len(),
            data.element_type(),
            chunks.len()
        );

        Ok(CompressedRecord {
            element_type: data.element_type(),
            extents: extents.clone(),
            chunk_size: self.chunk_size,
            chunks,
            chunk_indices: None,
        })
    }

    fn encode_window<T: Element>(
        &self,
        values: &[T],
        extents: &ArrayExtents,
        index: usize,
        window: ChunkWindow,
    ) -> Result<ChunkDescriptor, StorageError> {
        let mut scratch = Vec::with_capacity(window.num_elements() * T::SIZE);
        for_each_run(extents, &window, |start, _, len| {
            for &v in &values[start..start + len] {
                v.write_be(&mut scratch);
            }
        });

        Ok(ChunkDescriptor {
            index,
            compressed: self.compression.compress(&scratch)?,
            sizes: window.sizes,
            offsets: window.offsets,
        })
    }

    /// Decompress one chunk into its values, in the chunk's row-major order
    pub fn decode_chunk<T: Element>(&self, chunk: &ChunkDescriptor) -> Result<Vec<T>, StorageError> {
        let bytes = self.compression.decompress(&chunk.compressed)?;
        let expected = chunk.num_elements() * T::SIZE;
        if bytes.len() != expected {
            return Err(StorageError::Corrupt(format!(
                "chunk {} decompressed to {} bytes, expected {}",
                chunk.index,
                bytes.len(),
                expected
            )));
        }
        Ok(bytes.chunks_exact(T::SIZE).map(T::read_be).collect())
    }

    /// Decompress the chunks named in `selector`, or every chunk
    pub fn inverse(
        &self,
        record: &CompressedRecord,
        selector: Option<&BTreeSet<usize>>,
    ) -> Result<BTreeMap<usize, ArrayData>, StorageError> {
        record
            .chunks
            .iter()
            .filter(|c| selector.map_or(true, |s| s.contains(&c.index)))
            .map(|c| -> Result<(usize, ArrayData), StorageError> {
                let data = dispatch_type!(record.element_type, T => T::into_array(self.decode_chunk::<T>(c)?));
                Ok((c.index, data))
            })
            .collect()
    }

    /// Rebuild the whole array
    pub fn assemble(&self, record: &CompressedRecord) -> Result<ArrayData, StorageError> {
        dispatch_type!(record.element_type, T => Ok(T::into_array(self.assemble_typed::<T>(record)?)))
    }

    fn assemble_typed<T: Element>(&self, record: &CompressedRecord) -> Result<Vec<T>, StorageError> {
        let total = record.num_elements();
        let covered: usize = record.chunks.iter().map(|c| c.num_elements()).sum();
        if covered != total {
            return Err(StorageError::Corrupt(format!(
                "chunks cover {} values of {}",
                covered, total
            )));
        }

        if let [chunk] = record.chunks.as_slice() {
            return self.decode_chunk(chunk);
        }

        let mut out = vec![T::default(); total];
        for chunk in &record.chunks {
            let values = self.decode_chunk::<T>(chunk)?;
            let window = chunk.window();
            if window.sizes.len() != record.extents.ndim()
                || window
                    .offsets
                    .iter()
                    .zip(&window.sizes)
                    .zip(record.extents.dims())
                    .any(|((&o, &s), &d)| o + s > d)
            {
                return Err(StorageError::Corrupt(format!(
                    "chunk {} lies outside extents {:?}",
                    chunk.index,
                    record.extents.dims()
                )));
            }
            for_each_run(&record.extents, &window, |start, offset, len| {
                out[start..start + len].copy_from_slice(&values[offset..offset + len]);
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extents(dims: &[usize]) -> ArrayExtents {
        ArrayExtents::new(dims.to_vec()).unwrap()
    }

    #[test]
    fn small_arrays_use_one_chunk() {
        let codec = ChunkCodec::new(4).unwrap();
        let data = ArrayData::from((0..16).collect::<Vec<i32>>());
        let record = codec.forward(&data, &extents(&[4, 4])).unwrap();
        assert_eq!(record.chunks.len(), 1);
        assert_eq!(record.chunks[0].offsets, vec![0, 0]);
        assert_eq!(record.chunks[0].sizes, vec![4, 4]);
        assert_eq!(codec.assemble(&record).unwrap(), data);
    }

    #[test]
    fn tiling_is_ordered_and_complete() {
        let codec = ChunkCodec::new(3).unwrap();
        let data = ArrayData::from((0..70).map(|v| v as i16).collect::<Vec<_>>());
        let record = codec.forward(&data, &extents(&[7, 10])).unwrap();
        assert_eq!(record.chunks.len(), 12);
        for (i, chunk) in record.chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
        assert_eq!(codec.assemble(&record).unwrap(), data);
    }

    #[test]
    fn chunk_holds_window_rows() {
        let codec = ChunkCodec::new(2).unwrap();
        let data = ArrayData::from((0..15).map(|v| v as i8).collect::<Vec<_>>());
        let record = codec.forward(&data, &extents(&[3, 5])).unwrap();
        let second = codec.decode_chunk::<i8>(&record.chunks[1]).unwrap();
        assert_eq!(second, vec![2, 3, 7, 8]);
        let last = codec.decode_chunk::<i8>(&record.chunks[5]).unwrap();
        assert_eq!(last, vec![14]);
    }

    #[test]
    fn inverse_decodes_only_selected_chunks() {
        let codec = ChunkCodec::new(2).unwrap();
        let data = ArrayData::from(vec![1.0f64; 25]);
        let record = codec.forward(&data, &extents(&[5, 5])).unwrap();
        let selector: BTreeSet<usize> = [0, 8].into_iter().collect();
        let decoded = codec.inverse(&record, Some(&selector)).unwrap();
        assert_eq!(decoded.keys().copied().collect::<Vec<_>>(), vec![0, 8]);
        assert_eq!(decoded[&8], ArrayData::Double(vec![1.0]));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let codec = ChunkCodec::new(2).unwrap();
        let data = ArrayData::from(vec![0i64; 5]);
        assert!(codec.forward(&data, &extents(&[2, 2])).is_err());
    }

    #[test]
    fn corrupt_chunk_fails_the_read() {
        let codec = ChunkCodec::new(2).unwrap();
        let data = ArrayData::from(vec![3i32; 9]);
        let mut record = codec.forward(&data, &extents(&[3, 3])).unwrap();
        record.chunks[2].compressed = b"garbage".to_vec();
        assert!(codec.assemble(&record).is_err());

        let short = codec.compression.compress(&[0u8; 3]).unwrap();
        record.chunks[2].compressed = short;
        assert!(matches!(
            codec.assemble(&record),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn tiling_check_rejects_foreign_layouts() {
        let codec = ChunkCodec::new(2).unwrap();
        let data = ArrayData::from(vec![1i32; 16]);
        let single = ChunkCodec::new(4)
            .unwrap()
            .forward(&data, &extents(&[4, 4]))
            .unwrap();
        assert!(single.check_tiling().is_ok());

        let tiled = codec.forward(&data, &extents(&[4, 4])).unwrap();
        assert!(tiled.check_tiling().is_ok());

        let mut zero = tiled.clone();
        zero.chunk_size = 0;
        assert!(matches!(zero.check_tiling(), Err(StorageError::Corrupt(_))));

        let mut resized = tiled.clone();
        resized.chunk_size = 3;
        assert!(resized.check_tiling().is_err());

        let mut shuffled = tiled;
        shuffled.chunks.swap(0, 1);
        assert!(shuffled.check_tiling().is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(ChunkCodec::new(0).is_err());
    }
}
