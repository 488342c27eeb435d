// crates/yellowcab-core/src/error.rs

use thiserror::Error;

use crate::period::Period;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object store operation failed: {0}")]
    Bucket(#[from] yellowcab_bucket::BucketError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No extract published between {oldest} and {newest} ({probed} months probed)")]
    NoDataInWindow {
        newest: Period,
        oldest: Period,
        probed: u32,
    },

    #[error("Invalid extract name '{0}'")]
    InvalidExtractName(String),

    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Columns collide after lowercasing: {0}")]
    ColumnCollision(String),

    #[error("Unknown mart table '{0}'")]
    UnknownTable(String),

    #[error("Quality configuration files are missing: {}", .0.join(", "))]
    MissingQualityFiles(Vec<String>),

    #[error("Quality command could not be started: {0}")]
    QualityCommand(String),

    #[error("Data processing error: {0}")]
    Processing(String),
}

impl PipelineError {
    /// Whether a scheduler-level retry of the whole step can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Sqlx(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            PipelineError::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            PipelineError::Bucket(err) => err.is_transient(),
            PipelineError::Io(err) => io_is_transient(err),
            _ => false,
        }
    }
}

/// Local faults such as a missing or unreadable path never heal on retry.
fn io_is_transient(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::UnexpectedEof
    )
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pool_timeouts_as_transient() {
        assert!(PipelineError::Sqlx(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!PipelineError::Sqlx(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn local_file_faults_are_fatal_but_dropped_connections_retry() {
        use std::io::{Error, ErrorKind};

        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::InvalidData,
            ErrorKind::InvalidInput,
        ] {
            assert!(!PipelineError::Io(Error::from(kind)).is_transient(), "{kind:?}");
        }
        for kind in [ErrorKind::ConnectionReset, ErrorKind::TimedOut, ErrorKind::Interrupted] {
            assert!(PipelineError::Io(Error::from(kind)).is_transient(), "{kind:?}");
        }
    }

    #[test]
    fn domain_failures_are_fatal() {
        let err = PipelineError::MissingQualityFiles(vec![
            "configuration.yml".into(),
            "fact_yellow_taxi_check.yml".into(),
        ]);
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Quality configuration files are missing: configuration.yml, fact_yellow_taxi_check.yml"
        );
    }
}
