use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("host '{host}' is unreachable: {reason}")]
    UnreachableHost { host: String, reason: String },

    #[error("hypervisor query on '{host}' failed: {reason}")]
    Query { host: String, reason: String },

    #[error("unrecognized disk format: {}", path.display())]
    InvalidDiskFormat { path: PathBuf },

    #[error("differencing chain revisits {}", path.display())]
    CyclicChain { path: PathBuf },

    #[error("access denied: {}", path.display())]
    PathAccessDenied { path: PathBuf },

    #[error("path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    #[error("malformed path: {path}")]
    MalformedPath { path: String },

    #[error("disk {op} failed for {}: {source}", path.display())]
    DiskIo {
        path: PathBuf,
        op: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no scan target could be resolved")]
    NoScanTargets,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Maps a filesystem error on a scan root into the taxonomy, keeping
    /// "missing" and "denied" distinct from generic IO trouble.
    pub fn for_root(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::PathNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Error::PathAccessDenied {
                path: path.to_path_buf(),
            },
            _ => Error::Io(err),
        }
    }
}
