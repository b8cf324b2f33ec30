use std::path::PathBuf;
use thiserror::Error;

/// Failures callers need to tell apart. Everything else travels as plain
/// `anyhow` context.
#[derive(Debug, Error)]
pub enum MdcError {
    #[error("project `{project}`: path {} does not exist", path.display())]
    PathMissing { project: String, path: PathBuf },

    #[error("project `{project}`: path {} is not a directory", path.display())]
    NotADirectory { project: String, path: PathBuf },

    #[error("project `{project}`: command `{command}` failed: {reason}")]
    CommandFailed {
        project: String,
        command: String,
        reason: String,
    },

    #[error("project `{project}`: background command `{command}` failed to start: {reason}")]
    BackgroundSpawn {
        project: String,
        command: String,
        reason: String,
    },

    #[error("no tracked process with pid {0}")]
    ProcessNotFound(u32),

    #[error("unknown execution_mode `{0}`")]
    UnknownMode(String),

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("project `{project}`: no commands defined for `{action}`")]
    NoCommands { project: String, action: String },

    #[error("some projects failed:\n  {}", .0.join("\n  "))]
    ProjectsFailed(Vec<String>),
}
