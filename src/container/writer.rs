use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hdf5::types::TypeDescriptor;
use ndarray::{s, ArrayView2};
use tempfile::TempPath;

use crate::catalog::VariableRef;
use crate::config::{DEFAULT_CACHE_ROWS, DEFAULT_COMPRESSION_LEVEL};
use crate::container::format::{
    name_width, stored_name, StoredName, ATTR_END, ATTR_START, DATA, IDS, NAMES, TIMESTAMPS,
    VARIABLES,
};
use crate::decode::{DecodedMessage, DecodedSignal};
use crate::ingest::Discovery;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Rows buffered in memory before a flush; also the chunk height.
    pub window: usize,
    /// Deflate level, 1-9.
    pub compression_level: u8,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_CACHE_ROWS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// What a finished container holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub start: i64,
    pub end: i64,
    pub chunks_written: usize,
}

/// Streams decoded signals into a dense `rows x columns` HDF5 container.
///
/// Rows must arrive in non-decreasing order. Values land in an in-memory
/// window of `window` rows; when a row past the window arrives the window is
/// written as one chunk of the `data` dataset and the next one is opened. A
/// row below the open window is rejected with [`Error::OrderingViolation`].
///
/// Everything is written to a uniquely named temp file next to the target and
/// renamed into place by [`finish`](Self::finish). Dropping an unfinished
/// writer removes the temp file, so readers never see a partial container.
pub struct ContainerWriter {
    final_path: PathBuf,
    file: hdf5::File,
    data: hdf5::Dataset,
    options: WriterOptions,
    timestamps: Vec<i64>,
    variables: Vec<VariableRef>,
    names: Vec<StoredName>,
    ts_to_row: HashMap<i64, usize>,
    name_to_col: HashMap<String, usize>,
    cache: Vec<f64>,
    cache_start: usize,
    cache_height: usize,
    dirty: bool,
    chunks_written: usize,
    start: Option<i64>,
    end: Option<i64>,
    // Dropped last; deletes the file unless persisted.
    temp: TempPath,
}

impl ContainerWriter {
    pub fn create(path: impl Into<PathBuf>, discovery: &Discovery) -> Result<Self> {
        Self::create_with_options(path, discovery, WriterOptions::default())
    }

    pub fn create_with_options(
        path: impl Into<PathBuf>,
        discovery: &Discovery,
        options: WriterOptions,
    ) -> Result<Self> {
        if options.window == 0 {
            return Err(Error::Format("writer window must be > 0".to_string()));
        }
        let names = discovery
            .variables
            .iter()
            .map(|var| stored_name(&var.name))
            .collect::<Result<Vec<_>>>()?;

        let final_path = path.into();
        let temp = unique_temp_path(&final_path)?;
        let file = hdf5::File::create(&temp)?;

        let rows = discovery.rows();
        let cols = discovery.columns();
        let data = file
            .new_dataset::<f64>()
            .shape((rows, cols))
            .fill_value(f64::NAN);
        // HDF5 rejects zero-sized chunks.
        let data = if rows > 0 && cols > 0 {
            data.chunk((options.window.min(rows), cols))
                .deflate(options.compression_level)
        } else {
            data
        };
        let data = data.create(DATA)?;

        let ts_to_row = discovery
            .timestamps
            .iter()
            .enumerate()
            .map(|(row, &ts)| (ts, row))
            .collect();
        let name_to_col = discovery
            .variables
            .iter()
            .enumerate()
            .map(|(col, var)| (var.name.clone(), col))
            .collect();
        let cache_height = options.window.min(rows);

        Ok(Self {
            final_path,
            file,
            data,
            options,
            timestamps: discovery.timestamps.clone(),
            variables: discovery.variables.clone(),
            names,
            ts_to_row,
            name_to_col,
            cache: vec![f64::NAN; cache_height * cols],
            cache_start: 0,
            cache_height,
            dirty: false,
            chunks_written: 0,
            start: None,
            end: None,
            temp,
        })
    }

    pub fn rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn columns(&self) -> usize {
        self.variables.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_col.contains_key(name)
    }

    /// First row of the open window.
    pub fn window_start(&self) -> usize {
        self.cache_start
    }

    /// File being written; removed on drop unless `finish` succeeds.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }
    /// Store one signal. Its timestamp must have been discovered and its
    /// name must be a column.
    pub fn write(&mut self, signal: &DecodedSignal) -> Result<()> {
        let col = *self
            .name_to_col
            .get(&signal.name)
            .ok_or_else(|| Error::UnknownVariable(signal.name.clone()))?;
        let offset = self.locate(signal.timestamp)?;
        self.cache[offset + col] = signal.value;
        self.track(signal.timestamp);
        Ok(())
    }

    /// Store every signal of a message that has a column; signals without one
    /// were reported during discovery and are skipped.
    pub fn write_message(&mut self, message: &DecodedMessage) -> Result<()> {
        let offset = self.locate(message.timestamp)?;
        for signal in &message.signals {
            if let Some(&col) = self.name_to_col.get(&signal.name) {
                self.cache[offset + col] = signal.value;
            }
        }
        self.track(message.timestamp);
        Ok(())
    }

    /// Cache offset of the first cell in the row for `timestamp`, advancing
    /// the window as needed.
    fn locate(&mut self, timestamp: i64) -> Result<usize> {
        let row = *self
            .ts_to_row
            .get(&timestamp)
            .ok_or(Error::UnknownTimestamp(timestamp))?;
        if row < self.cache_start {
            return Err(Error::OrderingViolation {
                row,
                window_start: self.cache_start,
            });
        }
        while row >= self.cache_start + self.cache_height {
            self.advance_window()?;
        }
        self.dirty = true;
        Ok((row - self.cache_start) * self.columns())
    }

    fn track(&mut self, timestamp: i64) {
        self.start = Some(self.start.map_or(timestamp, |s| s.min(timestamp)));
        self.end = Some(self.end.map_or(timestamp, |e| e.max(timestamp)));
    }

    fn advance_window(&mut self) -> Result<()> {
        self.flush_window()?;
        self.dirty = false;
        self.cache_start += self.options.window;
        self.cache_height = self.options.window.min(self.rows() - self.cache_start);
        self.cache.clear();
        self.cache
            .resize(self.cache_height * self.columns(), f64::NAN);
        Ok(())
    }

    /// Windows no row landed in stay unallocated and read back as NaN.
    fn flush_window(&mut self) -> Result<()> {
        if self.cache_height == 0 || self.columns() == 0 || !self.dirty {
            return Ok(());
        }
        let end = self.cache_start + self.cache_height;
        let window = ArrayView2::from_shape((self.cache_height, self.columns()), &self.cache)
            .map_err(|_| Error::Corrupt("window does not match cache length"))?;
        self.data.write_slice(window, s![self.cache_start..end, ..])?;
        self.chunks_written += 1;
        log::debug!(
            "flushed rows {}..{} to {}",
            self.cache_start,
            end,
            self.temp.display()
        );
        Ok(())
    }

    /// Flush the open window, write the column and row datasets and the
    /// `start`/`end` attributes, close the file and publish it. The container
    /// is immutable afterwards.
    pub fn finish(mut self) -> Result<ContainerSummary> {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(Error::EmptyRun);
        };
        self.flush_window()?;

        let width = name_width(self.variables.iter().map(|v| v.name.as_str()));
        let variables = self.file.create_group(VARIABLES)?;
        variables
            .new_dataset_builder()
            .with_data_as(self.names.as_slice(), &TypeDescriptor::FixedAscii(width))
            .create(NAMES)?;
        let ids: Vec<i32> = self.variables.iter().map(|v| v.id).collect();
        variables
            .new_dataset_builder()
            .with_data(ids.as_slice())
            .create(IDS)?;
        self.file
            .new_dataset_builder()
            .with_data(self.timestamps.as_slice())
            .chunk(self.options.window.min(self.rows()))
            .deflate(self.options.compression_level)
            .create(TIMESTAMPS)?;
        self.file
            .new_attr::<i64>()
            .shape(())
            .create(ATTR_START)?
            .write_scalar(&start)?;
        self.file
            .new_attr::<i64>()
            .shape(())
            .create(ATTR_END)?
            .write_scalar(&end)?;

        let summary = ContainerSummary {
            path: self.final_path.clone(),
            rows: self.rows(),
            columns: self.columns(),
            start,
            end,
            chunks_written: self.chunks_written,
        };
        let Self {
            final_path,
            file,
            data,
            temp,
            ..
        } = self;
        drop(data);
        file.close()?;
        std::fs::File::open(&temp)?.sync_all()?;
        temp.persist(&final_path).map_err(|err| err.error)?;
        Ok(summary)
    }
}

/// Fresh sibling of `path` that no other writer or fetch shares. Removed on
/// drop unless persisted.
pub(crate) fn unique_temp_path(path: &Path) -> Result<TempPath> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    Ok(file.into_temp_path())
}
