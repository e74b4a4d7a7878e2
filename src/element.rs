use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Storage element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ElementType {
    /// Width of one element in bytes
    pub fn size(self) -> usize {
        match self {
            ElementType::Byte => 1,
            ElementType::Short => 2,
            ElementType::Int => 4,
            ElementType::Long => 8,
            ElementType::Float => 4,
            ElementType::Double => 8,
        }
    }
}

/// A primitive that can be stored in a record.
pub trait Element: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    const TYPE: ElementType;
    const SIZE: usize;

    /// Append the big-endian encoding of `self`
    fn write_be(self, out: &mut Vec<u8>);

    /// Decode from the first `SIZE` bytes of `bytes`
    fn read_be(bytes: &[u8]) -> Self;

    fn from_f64(value: f64) -> Self;

    fn into_array(values: Vec<Self>) -> ArrayData;

    fn as_slice(data: &ArrayData) -> Option<&[Self]>;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident, $size:expr) => {
        impl Element for $t {
            const TYPE: ElementType = ElementType::$variant;
            const SIZE: usize = $size;

            fn write_be(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }

            fn read_be(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(&bytes[..$size]);
                <$t>::from_be_bytes(buf)
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn into_array(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn as_slice(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }

        impl From<Vec<$t>> for ArrayData {
            fn from(values: Vec<$t>) -> Self {
                ArrayData::$variant(values)
            }
        }
    };
}

impl_element!(i8, Byte, 1);
impl_element!(i16, Short, 2);
impl_element!(i32, Int, 4);
impl_element!(i64, Long, 8);
impl_element!(f32, Float, 4);
impl_element!(f64, Double, 8);

/// Flat typed array in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

/// Run `$body` with `$values` bound to the typed vector inside an [`ArrayData`].
macro_rules! dispatch_array {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            $crate::element::ArrayData::Byte($values) => $body,
            $crate::element::ArrayData::Short($values) => $body,
            $crate::element::ArrayData::Int($values) => $body,
            $crate::element::ArrayData::Long($values) => $body,
            $crate::element::ArrayData::Float($values) => $body,
            $crate::element::ArrayData::Double($values) => $body,
        }
    };
}

/// Run `$body` with the type alias `$t` bound to the Rust type of an [`ElementType`].
macro_rules! dispatch_type {
    ($ty:expr, $t:ident => $body:expr) => {
        match $ty {
            $crate::element::ElementType::Byte => {
                type $t = i8;
                $body
            }
            $crate::element::ElementType::Short => {
                type $t = i16;
                $body
            }
            $crate::element::ElementType::Int => {
                type $t = i32;
                $body
            }
            $crate::element::ElementType::Long => {
                type $t = i64;
                $body
            }
            $crate::element::ElementType::Float => {
                type $t = f32;
                $body
            }
            $crate::element::ElementType::Double => {
                type $t = f64;
                $body
            }
        }
    };
}

/// Run `$body` on two arrays of the same element type, or `$mismatch` otherwise.
macro_rules! dispatch_pair {
    ($a:expr, $b:expr, ($x:ident, $y:ident) => $body:expr, _ => $mismatch:expr) => {
        match ($a, $b) {
            ($crate::element::ArrayData::Byte($x), $crate::element::ArrayData::Byte($y)) => $body,
            ($crate::element::ArrayData::Short($x), $crate::element::ArrayData::Short($y)) => $body,
            ($crate::element::ArrayData::Int($x), $crate::element::ArrayData::Int($y)) => $body,
            ($crate::element::ArrayData::Long($x), $crate::element::ArrayData::Long($y)) => $body,
            ($crate::element::ArrayData::Float($x), $crate::element::ArrayData::Float($y)) => $body,
            ($crate::element::ArrayData::Double($x), $crate::element::ArrayData::Double($y)) => {
                $body
            }
            _ => $mismatch,
        }
    };
}

pub(crate) use {dispatch_array, dispatch_pair, dispatch_type};

impl ArrayData {
    /// Array of `len` copies of `fill`
    pub fn filled(element_type: ElementType, len: usize, fill: f64) -> Self {
        dispatch_type!(element_type, T => T::into_array(vec![T::from_f64(fill); len]))
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayData::Byte(_) => ElementType::Byte,
            ArrayData::Short(_) => ElementType::Short,
            ArrayData::Int(_) => ElementType::Int,
            ArrayData::Long(_) => ElementType::Long,
            ArrayData::Float(_) => ElementType::Float,
            ArrayData::Double(_) => ElementType::Double,
        }
    }

    pub fn len(&self) -> usize {
        dispatch_array!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.element_type().size()
    }

    /// Values at `indices`, in that order
    pub fn gather(&self, indices: &[usize]) -> Self {
        dispatch_array!(self, values => indices.iter().map(|&i| values[i]).collect::<Vec<_>>().into())
    }

    /// Concatenate `other` onto the end of this array
    pub fn append(&mut self, other: &ArrayData) -> Result<(), StorageError> {
        let (ours, theirs) = (self.element_type(), other.element_type());
        dispatch_pair!(self, other, (dst, src) => {
            dst.extend_from_slice(src);
            Ok(())
        }, _ => Err(StorageError::InvalidRequest(format!(
            "cannot append {:?} data to {:?} data",
            theirs, ours
        ))))
    }

    /// Copy the 2-D `window` (x-first sizes) into this 2-D array of x-first
    /// `sizes` at `origin`.
    pub fn insert_window(
        &mut self,
        sizes: &[usize],
        window: &ArrayData,
        window_sizes: &[usize],
        origin: &[usize],
    ) -> Result<(), StorageError> {
        if sizes.len() != 2 || window_sizes.len() != 2 || origin.len() != 2 {
            return Err(StorageError::UnsupportedRequest(
                "partial records must be 2-dimensional".to_string(),
            ));
        }
        if origin[0] + window_sizes[0] > sizes[0] || origin[1] + window_sizes[1] > sizes[1] {
            return Err(StorageError::OutOfBounds {
                index: vec![origin[0] + window_sizes[0], origin[1] + window_sizes[1]],
                sizes: sizes.to_vec(),
            });
        }
        if window.len() != window_sizes[0] * window_sizes[1] {
            return Err(StorageError::InvalidRequest(format!(
                "window holds {} values but sizes {:?} need {}",
                window.len(),
                window_sizes,
                window_sizes[0] * window_sizes[1]
            )));
        }

        let (ours, theirs) = (self.element_type(), window.element_type());
        let (width, rows) = (window_sizes[0], window_sizes[1]);
        dispatch_pair!(self, window, (dst, src) => {
            for row in 0..rows {
                let start = (origin[1] + row) * sizes[0] + origin[0];
                dst[start..start + width].copy_from_slice(&src[row * width..(row + 1) * width]);
            }
            Ok(())
        }, _ => Err(StorageError::InvalidRequest(format!(
            "cannot insert {:?} data into {:?} data",
            theirs, ours
        ))))
    }
}
