use std::fmt;
use std::path::PathBuf;

/// Where a pipeline run currently is. Stages only move forward; any error
/// ends the run in `Failed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    WaitingForProxy,
    Resolving,
    Downloading { file: String },
    Verifying,
    Installing,
    Installed { path: PathBuf },
    Failed(String),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::WaitingForProxy => f.write_str("waiting for proxy"),
            PipelineState::Resolving => f.write_str("resolving manifest"),
            PipelineState::Downloading { file } => write!(f, "downloading {file}"),
            PipelineState::Verifying => f.write_str("verifying signature"),
            PipelineState::Installing => f.write_str("installing"),
            PipelineState::Installed { path } => write!(f, "installed at {}", path.display()),
            PipelineState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
