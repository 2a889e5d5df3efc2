use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("validation rejected on `{stage}`: {details}"))]
    Validation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to create view-state directory at {path:?} on `{stage}`: {source}"))]
    CreateStateDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize view state on `{stage}`: {source}"))]
    SerializeState {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write view-state file at {path:?} on `{stage}`: {source}"))]
    WriteState {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace view-state file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    ReplaceStateFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub type SyncResult<T> = Result<T, SyncError>;
