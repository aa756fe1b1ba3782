use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Build errors.
///
/// Everything surfaces at the top level; nothing is recovered mid-build.
/// `main` prints one diagnostic line and exits with [`Error::exit_code`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("substitution error: {0}")]
    Substitution(String),

    #[error("malformed if expression `{expr}`: {message}")]
    IfSyntax { expr: String, message: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with code {code}: {command}")]
    Child { command: String, code: i32 },

    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error. Child failures propagate the
    /// child's code, clamped so a failure never maps to 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Child { code, .. } => (*code).max(1),
            _ => 1,
        }
    }
}
