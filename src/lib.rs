//! Dense columnar storage for vehicle bus telemetry.
//!
//! Raw frame logs are decoded against a CAN schema catalog, discovered in a
//! first pass, and streamed into a write-once compressed container in a
//! second. Containers are projected by variable id and merged across runs to
//! answer range queries as a lazy stream of sparse records.

pub mod catalog;
pub mod config;
pub mod container;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod query;
pub mod storage;

pub use catalog::{SchemaCatalog, VariableCatalog, VariableRef};
pub use config::StoreConfig;
pub use container::{ContainerReader, ContainerWriter, DenseMatrix};
pub use decode::{DecodedSignal, FrameDecoder, FrameLog, RawFrame};
pub use error::{Error, Result};
pub use ingest::{import_run, Discovery, ImportSummary, NoProgress, ProgressSink};
pub use query::{PointRecord, QueryOutcome, QueryPlan, RangeMerger, RangeQuery, RecordStream, RunSpan};
pub use storage::{BlobStore, ContainerStore, DirBlobStore};
