//! Write-once dense run containers.
//!
//! A container is an HDF5 file holding one run as a `rows x columns` f64
//! matrix: one row per distinct timestamp, one column per variable observed
//! in that run. Missing cells are NaN. See [`format`] for the layout.

pub mod format;
mod reader;
mod writer;

pub use reader::{epoch_ms_to_datetime, ContainerReader, ProjectedChunks};
pub use writer::{ContainerSummary, ContainerWriter, WriterOptions};

pub(crate) use writer::unique_temp_path;

use crate::{Error, Result};

/// Row-major f64 matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl DenseMatrix {
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            values: vec![value; rows * cols],
        }
    }

    pub fn with_capacity(rows: usize, cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            values: Vec::with_capacity(rows * cols),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows).map(|row| self.get(row, col)).collect()
    }

    /// Stack `other` below `self`.
    pub fn append(&mut self, other: &DenseMatrix) -> Result<()> {
        if other.cols != self.cols {
            return Err(Error::Corrupt("appending matrix with different width"));
        }
        self.values.extend_from_slice(&other.values);
        self.rows += other.rows;
        Ok(())
    }
}
