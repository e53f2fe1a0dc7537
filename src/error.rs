use derive_more::Display;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display)]
pub enum Error {
    #[display("IO error at {path}: {error}")]
    Io { error: std::io::Error, path: String },

    #[display("configuration error: {msg}")]
    Config { msg: String },

    #[display("hint parse error in {path}: {msg}")]
    HintParse { path: String, msg: String },

    #[display("package set validation failed: {count} error(s)")]
    Validation { count: usize },

    #[display("package merge conflict: {msg}")]
    Merge { msg: String },

    #[display("upload rejected: {msg}")]
    Upload { msg: String },

    #[display("permission denied: {path}")]
    PermissionDenied { path: String },

    #[display("subprocess {cmd} failed: {msg}")]
    Subprocess { cmd: String, msg: String },
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io {
            error,
            path: "<unknown>".to_string(),
        }
    }
}

/// Extension trait for attaching path context to I/O errors, matching the
/// pattern used throughout for filesystem operations under the release
/// area, staging tree, and vault.
pub trait ResultIoExt<T> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T>;
}

impl<T> ResultIoExt<T> for std::result::Result<T, std::io::Error> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|error| match error.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: path.display().to_string(),
            },
            _ => Error::Io {
                error,
                path: path.display().to_string(),
            },
        })
    }
}
