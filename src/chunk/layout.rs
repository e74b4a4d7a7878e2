use crate::error::StorageError;
use serde::{Deserialize, Serialize};

/// Row-major extents of an array: the last dimension varies fastest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayExtents(Vec<usize>);

impl ArrayExtents {
    pub fn new(dims: Vec<usize>) -> Result<Self, StorageError> {
        if dims.is_empty() {
            return Err(StorageError::InvalidRequest(
                "array extents need at least one dimension".to_string(),
            ));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(StorageError::InvalidRequest(format!(
                "array extents must be positive: {:?}",
                dims
            )));
        }
        Ok(Self(dims))
    }

    /// Extents from record sizes, which list the fastest dimension first
    pub fn from_record_sizes(sizes: &[usize]) -> Result<Self, StorageError> {
        Self::new(sizes.iter().rev().copied().collect())
    }

    /// Record sizes (fastest dimension first)
    pub fn to_record_sizes(&self) -> Vec<usize> {
        self.0.iter().rev().copied().collect()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major element strides
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.0.len()];
        for d in (0..self.0.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.0[d + 1];
        }
        strides
    }
}

/// A rectangular window of an array, in row-major order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub sizes: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl ChunkWindow {
    pub fn num_elements(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Whether the row-major `point` lies inside the window
    pub fn contains(&self, point: &[usize]) -> bool {
        Self::holds(&self.offsets, &self.sizes, point)
    }

    pub(crate) fn holds(offsets: &[usize], sizes: &[usize], point: &[usize]) -> bool {
        point.len() == sizes.len()
            && point
                .iter()
                .zip(offsets.iter().zip(sizes))
                .all(|(&p, (&o, &s))| p >= o && p < o + s)
    }
}

/// Regular tiling of an array into chunks of `chunk_size` per dimension.
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    extents: ArrayExtents,
    chunk_size: usize,
}

impl ChunkLayout {
    pub fn new(extents: ArrayExtents, chunk_size: usize) -> Result<Self, StorageError> {
        if chunk_size == 0 {
            return Err(StorageError::InvalidRequest(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self {
            extents,
            chunk_size,
        })
    }

    pub fn extents(&self) -> &ArrayExtents {
        &self.extents
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks along each dimension
    pub fn chunks_per_dim(&self) -> Vec<usize> {
        self.extents
            .dims()
            .iter()
            .map(|d| d.div_ceil(self.chunk_size))
            .collect()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks_per_dim().iter().product()
    }

    /// Index of the chunk holding the row-major `point`
    pub fn chunk_index_of(&self, point: &[usize]) -> usize {
        point
            .iter()
            .zip(self.chunks_per_dim())
            .fold(0, |index, (&p, count)| index * count + p / self.chunk_size)
    }

    /// Chunk windows in tiling order
    pub fn windows(&self) -> ChunkWindows<'_> {
        ChunkWindows {
            layout: self,
            next: Some(self.window_at(vec![0; self.extents.ndim()])),
        }
    }

    fn window_at(&self, offsets: Vec<usize>) -> ChunkWindow {
        let sizes = offsets
            .iter()
            .zip(self.extents.dims())
            .map(|(&o, &d)| self.chunk_size.min(d - o))
            .collect();
        ChunkWindow { sizes, offsets }
    }

    /// Window after `prev`: advance the innermost dimension by the previous
    /// size and carry outward on overflow. `None` once every dimension wraps.
    fn advance(&self, prev: &ChunkWindow) -> Option<ChunkWindow> {
        let dims = self.extents.dims();
        let mut offsets = prev.offsets.clone();
        let mut d = dims.len() - 1;
        loop {
            offsets[d] += prev.sizes[d];
            if offsets[d] < dims[d] {
                return Some(self.window_at(offsets));
            }
            offsets[d] = 0;
            if d == 0 {
                return None;
            }
            d -= 1;
        }
    }
}

/// Iterator over the chunk windows of a [`ChunkLayout`].
pub struct ChunkWindows<'a> {
    layout: &'a ChunkLayout,
    next: Option<ChunkWindow>,
}

impl Iterator for ChunkWindows<'_> {
    type Item = ChunkWindow;

    fn next(&mut self) -> Option<ChunkWindow> {
        let current = self.next.take()?;
        self.next = self.layout.advance(&current);
        Some(current)
    }
}

/// Call `f(array_offset, window_offset, len)` for each contiguous run of
/// `window` inside an array of `extents`, in the window's row-major order.
pub(crate) fn for_each_run(
    extents: &ArrayExtents,
    window: &ChunkWindow,
    mut f: impl FnMut(usize, usize, usize),
) {
    let ndim = extents.ndim();
    let strides = extents.strides();
    let run = window.sizes[ndim - 1];
    let outer: usize = window.sizes[..ndim - 1].iter().product();
    let mut counter = vec![0usize; ndim - 1];

    for row in 0..outer {
        let start = window.offsets[ndim - 1]
            + counter
                .iter()
                .enumerate()
                .map(|(d, &c)| (window.offsets[d] + c) * strides[d])
                .sum::<usize>();
        f(start, row * run, run);

        for d in (0..ndim - 1).rev() {
            counter[d] += 1;
            if counter[d] < window.sizes[d] {
                break;
            }
            counter[d] = 0;
        }
    }
}
