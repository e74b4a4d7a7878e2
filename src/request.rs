use crate::element::ArrayData;
use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An (x, y) position; x is the fastest-varying dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: usize,
    pub y: usize,
}

impl Point {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Which part of a record to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Request {
    #[default]
    All,
    Points(Vec<Point>),
    /// Whole rows, by y index
    RowLine(Vec<usize>),
    /// Whole columns, by x index
    ColumnLine(Vec<usize>),
    /// `[min, max)` rectangle; max corners are clamped to the record sizes
    Slab { min: Point, max: Point },
}

/// Ordered points a request expands to, and the sizes of the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    pub points: Vec<Point>,
    /// Result sizes, fastest dimension first
    pub sizes: Vec<usize>,
}

impl Request {
    pub fn is_slab(&self) -> bool {
        matches!(self, Request::Slab { .. })
    }

    /// Expand into points against a record of x-first `sizes`.
    ///
    /// 2-D records get 2-D results; 1-D records are addressed by x alone and
    /// give 1-D results.
    pub fn plan(&self, sizes: &[usize]) -> Result<RequestPlan, StorageError> {
        match sizes.len() {
            1 => self.plan_1d(sizes[0]),
            2 => self.plan_2d(sizes[0], sizes[1]),
            n => Err(StorageError::UnsupportedRequest(format!(
                "{} requests need a 1 or 2 dimensional record, got {} dimensions",
                self.name(),
                n
            ))),
        }
    }

    fn plan_2d(&self, nx: usize, ny: usize) -> Result<RequestPlan, StorageError> {
        let sizes = vec![nx, ny];
        match self {
            Request::All => Ok(RequestPlan {
                points: (0..ny)
                    .flat_map(|y| (0..nx).map(move |x| Point::new(x, y)))
                    .collect(),
                sizes,
            }),
            Request::Points(points) => {
                for p in points {
                    if p.x >= nx || p.y >= ny {
                        return Err(StorageError::OutOfBounds {
                            index: vec![p.x, p.y],
                            sizes,
                        });
                    }
                }
                Ok(RequestPlan {
                    points: points.clone(),
                    sizes: vec![1, points.len()],
                })
            }
            Request::RowLine(rows) => {
                check_line(rows, ny, &sizes)?;
                Ok(RequestPlan {
                    points: rows
                        .iter()
                        .flat_map(|&y| (0..nx).map(move |x| Point::new(x, y)))
                        .collect(),
                    sizes: vec![nx, rows.len()],
                })
            }
            Request::ColumnLine(columns) => {
                check_line(columns, nx, &sizes)?;
                Ok(RequestPlan {
                    points: (0..ny)
                        .flat_map(|y| columns.iter().map(move |&x| Point::new(x, y)))
                        .collect(),
                    sizes: vec![columns.len(), ny],
                })
            }
            Request::Slab { min, max } => {
                let (x0, x1) = clamp_range(min.x, max.x, nx);
                let (y0, y1) = clamp_range(min.y, max.y, ny);
                Ok(RequestPlan {
                    points: (y0..y1)
                        .flat_map(|y| (x0..x1).map(move |x| Point::new(x, y)))
                        .collect(),
                    sizes: vec![x1 - x0, y1 - y0],
                })
            }
        }
    }

    fn plan_1d(&self, n: usize) -> Result<RequestPlan, StorageError> {
        let indices: Vec<usize> = match self {
            Request::All => (0..n).collect(),
            Request::Points(points) => points.iter().map(|p| p.x).collect(),
            Request::RowLine(indices) | Request::ColumnLine(indices) => {
                check_line(indices, n, &[n])?;
                indices.clone()
            }
            Request::Slab { min, max } => {
                let (x0, x1) = clamp_range(min.x, max.x, n);
                (x0..x1).collect()
            }
        };
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(StorageError::OutOfBounds {
                index: vec![bad],
                sizes: vec![n],
            });
        }
        Ok(RequestPlan {
            sizes: vec![indices.len()],
            points: indices.into_iter().map(|x| Point::new(x, 0)).collect(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::All => "ALL",
            Request::Points(_) => "POINTS",
            Request::RowLine(_) => "ROW_LINE",
            Request::ColumnLine(_) => "COLUMN_LINE",
            Request::Slab { .. } => "SLAB",
        }
    }

    /// Apply to an uncompressed record; returns the data and its x-first sizes
    pub fn apply(
        &self,
        data: &ArrayData,
        sizes: &[usize],
    ) -> Result<(ArrayData, Vec<usize>), StorageError> {
        if let Request::All = self {
            return Ok((data.clone(), sizes.to_vec()));
        }
        let plan = self.plan(sizes)?;
        let nx = sizes[0];
        let indices: Vec<usize> = plan.points.iter().map(|p| p.y * nx + p.x).collect();
        if let Some(&bad) = indices.iter().find(|&&i| i >= data.len()) {
            return Err(StorageError::Corrupt(format!(
                "record holds {} values but index {} was requested",
                data.len(),
                bad
            )));
        }
        Ok((data.gather(&indices), plan.sizes))
    }
}

fn check_line(indices: &[usize], dim: usize, sizes: &[usize]) -> Result<(), StorageError> {
    let mut seen = HashSet::with_capacity(indices.len());
    for &i in indices {
        if i >= dim {
            return Err(StorageError::OutOfBounds {
                index: vec![i],
                sizes: sizes.to_vec(),
            });
        }
        if !seen.insert(i) {
            return Err(StorageError::InvalidRequest(format!(
                "duplicate line index {}",
                i
            )));
        }
    }
    Ok(())
}

fn clamp_range(min: usize, max: usize, dim: usize) -> (usize, usize) {
    let max = max.min(dim);
    (min.min(max), max)
}
