//! Local container directory with optional remote mirrors.
//!
//! Containers live at `data_dir/{run_id}.h5`. A container missing locally is
//! materialized from the data remote on first open; uploaded raw logs are
//! resolved the same way from the upload remote.

mod blob;

pub use blob::{BlobStore, DirBlobStore};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::config::StoreConfig;
use crate::container::format::CONTAINER_EXTENSION;
use crate::container::{unique_temp_path, ContainerReader, ContainerWriter, WriterOptions};
use crate::ingest::Discovery;
use crate::query::RunSpan;
use crate::{Error, Result};

pub struct ContainerStore {
    config: StoreConfig,
    data_remote: Option<Box<dyn BlobStore>>,
    upload_remote: Option<Box<dyn BlobStore>>,
}

impl ContainerStore {
    /// Remotes configured as paths become [`DirBlobStore`]s.
    pub fn new(config: StoreConfig) -> Self {
        let data_remote = config
            .data_remote
            .clone()
            .map(|root| Box::new(DirBlobStore::new(root)) as Box<dyn BlobStore>);
        let upload_remote = config
            .upload_remote
            .clone()
            .map(|root| Box::new(DirBlobStore::new(root)) as Box<dyn BlobStore>);
        Self {
            config,
            data_remote,
            upload_remote,
        }
    }

    pub fn with_remote(mut self, remote: impl BlobStore + 'static) -> Self {
        self.data_remote = Some(Box::new(remote));
        self
    }

    pub fn with_upload_remote(mut self, remote: impl BlobStore + 'static) -> Self {
        self.upload_remote = Some(Box::new(remote));
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn container_path(&self, run_id: u64) -> PathBuf {
        self.config.data_dir.join(container_key(run_id))
    }

    /// Open a finished container, fetching it from the data remote first if
    /// it is not present locally.
    pub fn open(&self, run_id: u64) -> Result<ContainerReader> {
        let path = self.ensure_local(run_id)?;
        ContainerReader::open(path)
    }

    pub fn create(&self, run_id: u64, discovery: &Discovery) -> Result<ContainerWriter> {
        let options = WriterOptions {
            window: self.config.cache_rows,
            compression_level: self.config.compression_level,
        };
        ContainerWriter::create_with_options(self.container_path(run_id), discovery, options)
    }

    /// Push the local container to the data remote. Failures are logged and
    /// reported as `false`; the local copy stays authoritative.
    pub fn backup(&self, run_id: u64) -> bool {
        let Some(remote) = &self.data_remote else {
            return false;
        };
        let key = container_key(run_id);
        match remote.put(&key, &self.container_path(run_id)) {
            Ok(()) => {
                log::info!("backed up {key} to remote");
                true
            }
            Err(err) => {
                log::warn!("backup of {key} failed: {err}");
                false
            }
        }
    }

    /// Modification time of the container file.
    pub fn last_modified(&self, run_id: u64) -> Result<OffsetDateTime> {
        let path = self.ensure_local(run_id)?;
        let modified = std::fs::metadata(path)?.modified()?;
        Ok(OffsetDateTime::from(modified))
    }

    /// Variable ids stored in one run, in column order.
    pub fn included_variables(&self, run_id: u64) -> Result<Vec<i32>> {
        Ok(self.open(run_id)?.variables().to_vec())
    }

    /// Published containers, local or on the data remote, ordered by run id.
    /// Runs held only by the remote are materialized on the way. A remote
    /// that cannot be listed fails the call rather than shrinking the result.
    pub fn spans(&self) -> Result<Vec<RunSpan>> {
        let mut ids = BTreeSet::new();
        match std::fs::read_dir(&self.config.data_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if let Some(run_id) =
                        entry.file_name().to_str().and_then(parse_container_filename)
                    {
                        ids.insert(run_id);
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(remote) = &self.data_remote {
            let local = ids.len();
            ids.extend(
                remote
                    .list()?
                    .iter()
                    .filter_map(|key| parse_container_filename(key)),
            );
            if ids.len() > local {
                log::info!("{} run(s) listed only on the remote", ids.len() - local);
            }
        }
        ids.into_iter()
            .map(|run_id| Ok(RunSpan::from_reader(run_id, &self.open(run_id)?)))
            .collect()
    }

    /// Raw log for `run_id`: `upload_dir/{run_id}.csv`, fetched from the
    /// upload remote when absent.
    pub fn resolve_input(&self, run_id: u64) -> Result<PathBuf> {
        let key = format!("{run_id}.csv");
        let path = self.config.upload_dir.join(&key);
        if path.is_file() {
            return Ok(path);
        }
        if let Some(remote) = &self.upload_remote {
            if materialize(remote.as_ref(), &key, &path)? {
                return Ok(path);
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no uploaded log for run {run_id}"),
        )
        .into())
    }

    fn ensure_local(&self, run_id: u64) -> Result<PathBuf> {
        let path = self.container_path(run_id);
        if path.is_file() {
            return Ok(path);
        }
        if let Some(remote) = &self.data_remote {
            log::info!("run {run_id} not found locally, fetching from remote");
            if materialize(remote.as_ref(), &container_key(run_id), &path)? {
                return Ok(path);
            }
        }
        Err(Error::MissingContainer(run_id))
    }
}

pub fn container_key(run_id: u64) -> String {
    format!("{run_id}.{CONTAINER_EXTENSION}")
}

/// Run id of a published container file name. Temp files never match.
pub fn parse_container_filename(name: &str) -> Option<u64> {
    let base = name
        .strip_suffix(CONTAINER_EXTENSION)?
        .strip_suffix('.')?;
    if base.is_empty() || !base.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    base.parse().ok()
}

/// Fetch `key` into a temp file unique to this call and rename it over
/// `dest`. `dest` either appears complete or not at all, and concurrent
/// fetches of one key never write to the same file.
fn materialize(remote: &dyn BlobStore, key: &str, dest: &Path) -> Result<bool> {
    let temp = unique_temp_path(dest)?;
    match remote.fetch(key, &temp) {
        Ok(false) => Ok(false),
        Ok(true) => {
            // A concurrent fetch may have published first.
            if !dest.is_file() {
                temp.persist(dest).map_err(|err| err.error)?;
            }
            Ok(true)
        }
        Err(err) => {
            log::warn!("fetching {key} from remote failed: {err}");
            Err(err)
        }
    }
}
