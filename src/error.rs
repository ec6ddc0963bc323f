use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input log or schema catalog is structurally invalid. Aborts the import
    /// before any container exists.
    #[error("invalid input format: {0}")]
    Format(String),

    #[error("timestamp {0} was not seen during discovery")]
    UnknownTimestamp(i64),

    #[error("variable {0:?} has no column in this container")]
    UnknownVariable(String),

    /// Row arrived below the writer's current cache window.
    #[error("row {row} arrived after window starting at row {window_start} was opened")]
    OrderingViolation { row: usize, window_start: usize },

    /// Container absent locally and on the remote.
    #[error("data for run {0} not found")]
    MissingContainer(u64),

    #[error("corrupt container: {0}")]
    Corrupt(&'static str),

    #[error("hdf5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("run contains no decodable frames")]
    EmptyRun,

    #[error("remote store error: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, Error>;
