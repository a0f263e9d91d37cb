//! Command dispatch for one headset
//!
//! This module handles:
//! - Gating every command on connectivity and selection
//! - Resolving app names to package identifiers
//! - Turning gateway failures into status text
//! - Watching launched processes until they exit
//! - Downloading mixed reality captures

mod dispatcher;
mod files;
mod watchdog;

pub use dispatcher::{CommandDispatcher, DispatchOptions};
pub use files::{device_folder_name, download_recordings, DownloadReport};
pub use watchdog::{ProcessWatchdog, WatchOutcome, WatchdogRegistry};

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised on the console side of a command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("App ({0}) could not be found")]
    AppNotFound(String),

    #[error("File name ({0}) is not a plain file name")]
    UnsafeFileName(String),

    #[error("Cannot create download folder {path}: {source}")]
    DownloadFolder {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}
