//! Error types for page-prerender.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for page-prerender operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building pages.
///
/// Every variant is fatal for the build. Nothing in the pipeline retries.
#[derive(Debug, Error)]
pub enum Error {
    /// A sandboxed fetch or import asked for an absolute / network URL.
    #[error("absolute URLs are not supported during page build: {0}")]
    UnsupportedUrl(String),

    /// A relative URL resolved to a file that does not exist.
    #[error("resource not found: {url} ({})", .path.display())]
    NotFound { url: String, path: PathBuf },

    /// A relative URL climbed above the output root.
    #[error("resource escapes the output root: {0}")]
    OutsideRoot(String),

    /// A prebuilt artifact (bundle, sandbox script) is missing from the output tree.
    #[error("missing build asset: {}", .0.display())]
    MissingAsset(PathBuf),

    /// Sandbox script failed to evaluate, or the sandbox event loop errored.
    #[error("sandbox script error: {0}")]
    Script(String),

    /// A scheduled cell task rejected.
    #[error("cell task {task} failed: {message}")]
    CellFailed { task: u32, message: String },

    /// The sandbox signalled a host environment that no longer exists.
    #[error("host environment is gone")]
    HostGone,

    /// The sandbox targeted an element id that is not in the host document.
    #[error("no element with id '{0}' in host document")]
    ElementNotFound(String),

    /// Page path is absolute, has a scheme, or climbs out of the output root.
    #[error("invalid page path '{0}': must be relative and stay inside the output root")]
    InvalidPagePath(String),

    /// Two pages declare the same output path.
    #[error("duplicate page path: {0}")]
    DuplicatePage(String),

    /// Sandboxed work did not settle within the configured limit.
    #[error("sandboxed work did not settle within {0:?}")]
    DrainTimeout(Duration),

    /// An external build step (docs, style compiler, bundler) failed.
    #[error("{step} failed: {message}")]
    Step { step: String, message: String },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (config or manifest) error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
