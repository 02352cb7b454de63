pub mod pipeline;
pub mod runner;
pub mod stage;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage '{stage}': failed to start '{program}': {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stage '{stage}' exited with code {code:?}")]
    StageFailed { stage: String, code: Option<i32> },
    #[error("stage '{stage}': required file not found: {path:?}")]
    MissingInput { stage: String, path: PathBuf },
    #[error("stage '{stage}': {source}")]
    Io {
        stage: String,
        #[source]
        source: std::io::Error,
    },
    #[error("kernel image {path:?} is {size} bytes, exceeding the flash limit of {limit} bytes")]
    ImageTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
