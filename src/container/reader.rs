use std::ops::Deref;
use std::path::{Path, PathBuf};

use ndarray::s;
use time::OffsetDateTime;

use crate::config::DEFAULT_CACHE_ROWS;
use crate::container::format::{
    check_signature, chunk_count, StoredName, ATTR_END, ATTR_START, DATA, IDS, NAMES,
    TIMESTAMPS, VARIABLES,
};
use crate::container::DenseMatrix;
use crate::{Error, Result};

/// Read-only view of a finished container.
///
/// Names, ids and timestamps are loaded on open; `data` is read lazily one
/// chunk row-band at a time.
pub struct ContainerReader {
    path: PathBuf,
    // Held so the file stays open for as long as `data` is read.
    _file: hdf5::File,
    data: hdf5::Dataset,
    chunk_rows: usize,
    start: i64,
    end: i64,
    names: Vec<String>,
    ids: Vec<i32>,
    timestamps: Vec<i64>,
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_signature(&path)?;
        let file = hdf5::File::open(&path)?;

        let data = file.dataset(DATA)?;
        let shape = data.shape();
        let &[rows, cols] = shape.as_slice() else {
            return Err(Error::Corrupt("data is not two-dimensional"));
        };

        let names: Vec<String> = file
            .dataset(&format!("{VARIABLES}/{NAMES}"))?
            .read_raw::<StoredName>()?
            .iter()
            .map(|name| name.as_str().to_string())
            .collect();
        let ids = file
            .dataset(&format!("{VARIABLES}/{IDS}"))?
            .read_raw::<i32>()?;
        let timestamps = file.dataset(TIMESTAMPS)?.read_raw::<i64>()?;
        if names.len() != cols || ids.len() != cols {
            return Err(Error::Corrupt("variable tables do not match data width"));
        }
        if timestamps.len() != rows {
            return Err(Error::Corrupt("timestamps do not match data height"));
        }
        let start = file.attr(ATTR_START)?.read_scalar::<i64>()?;
        let end = file.attr(ATTR_END)?.read_scalar::<i64>()?;

        // Contiguous files are read in bands of the default window.
        let chunk_rows = data
            .chunk()
            .and_then(|dims| dims.first().copied())
            .filter(|&height| height > 0)
            .unwrap_or(DEFAULT_CACHE_ROWS);

        Ok(Self {
            path,
            _file: file,
            data,
            chunk_rows,
            start,
            end,
            names,
            ids,
            timestamps,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column_count(&self) -> usize {
        self.ids.len()
    }

    /// Earliest timestamp written, epoch milliseconds.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Latest timestamp written, epoch milliseconds.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Stored variable ids in column order.
    pub fn variables(&self) -> &[i32] {
        &self.ids
    }

    /// Stored variable names in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Row timestamps, epoch milliseconds, ascending.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Row timestamps as UTC instants.
    pub fn times(&self) -> impl Iterator<Item = OffsetDateTime> + '_ {
        self.timestamps.iter().map(|&ms| epoch_ms_to_datetime(ms))
    }

    pub fn column_of(&self, id: i32) -> Option<usize> {
        self.ids.iter().position(|&stored| stored == id)
    }

    /// Modification time of the backing file.
    pub fn last_modified(&self) -> Result<OffsetDateTime> {
        let modified = std::fs::metadata(&self.path)?.modified()?;
        Ok(OffsetDateTime::from(modified))
    }

    /// Project `ids` chunk by chunk. Ids this container does not hold come
    /// back as all-NaN columns.
    pub fn project_chunks(&self, ids: &[i32]) -> ProjectedChunks<&Self> {
        ProjectedChunks::new(self, ids)
    }

    pub fn chunk_count(&self) -> usize {
        chunk_count(self.row_count(), self.chunk_rows)
    }

    /// Dense `rows x ids.len()` projection.
    pub fn read(&self, ids: &[i32]) -> Result<DenseMatrix> {
        let mut out = DenseMatrix::with_capacity(self.row_count(), ids.len());
        for block in self.project_chunks(ids) {
            out.append(&block?)?;
        }
        Ok(out)
    }

    fn band_rows(&self, index: usize) -> usize {
        let start = index * self.chunk_rows;
        self.chunk_rows.min(self.row_count() - start)
    }

    /// Rows of chunk band `index`, all stored columns, row-major.
    fn load_band(&self, index: usize) -> Result<ndarray::Array2<f64>> {
        let start = index * self.chunk_rows;
        let end = start + self.band_rows(index);
        Ok(self.data.read_slice_2d::<f64, _>(s![start..end, ..])?)
    }
}

/// Lazy per-chunk projection; see [`ContainerReader::project_chunks`].
///
/// Generic over the reader handle so a stream can own its reader through an
/// `Arc` while projecting.
pub struct ProjectedChunks<R> {
    reader: R,
    columns: Vec<Option<usize>>,
    next_chunk: usize,
    next_row: usize,
}

impl<R: Deref<Target = ContainerReader>> ProjectedChunks<R> {
    pub fn new(reader: R, ids: &[i32]) -> Self {
        let columns = ids.iter().map(|&id| reader.column_of(id)).collect();
        Self {
            reader,
            columns,
            next_chunk: 0,
            next_row: 0,
        }
    }

    pub fn reader(&self) -> &ContainerReader {
        &self.reader
    }

    /// Container row of the first row in the next block.
    pub fn next_row(&self) -> usize {
        self.next_row
    }
}

impl<R: Deref<Target = ContainerReader>> Iterator for ProjectedChunks<R> {
    type Item = Result<DenseMatrix>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_chunk >= self.reader.chunk_count() {
            return None;
        }
        let index = self.next_chunk;
        self.next_chunk += 1;

        let rows = self.reader.band_rows(index);
        self.next_row += rows;
        let mut block = DenseMatrix::filled(rows, self.columns.len(), f64::NAN);
        if self.columns.iter().all(Option::is_none) {
            return Some(Ok(block));
        }
        let values = match self.reader.load_band(index) {
            Ok(values) => values,
            Err(err) => return Some(Err(err)),
        };
        for row in 0..rows {
            for (out_col, stored) in self.columns.iter().enumerate() {
                if let Some(col) = stored {
                    block.set(row, out_col, values[[row, *col]]);
                }
            }
        }
        Some(Ok(block))
    }
}

pub fn epoch_ms_to_datetime(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
