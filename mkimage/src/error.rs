// SPDX-License-Identifier: MPL-2.0

use std::{fmt, io, path::Path};

/// The class of a build failure.
///
/// Every class is fatal: the build is aborted at the point of detection
/// and the caller is expected to fix the input and start over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown target, unsupported compression, misplaced `.sbat`, and
    /// other invalid combinations of build parameters.
    Config,
    /// An input file is missing or unreadable, or the output cannot be
    /// written.
    Resource,
    /// The produced image does not fit the limits of its platform.
    Capacity,
    /// A collaborator handed back bytes that contradict their own
    /// description, e.g. a stub too small to hold a patched field.
    Format,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::Resource => "resource error",
            ErrorKind::Capacity => "capacity error",
            ErrorKind::Format => "format error",
        };
        f.write_str(name)
    }
}

/// The error used in this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    source: Option<io::Error>,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub fn with_message(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            msg: msg.into(),
            source: None,
        }
    }

    /// Wraps a host I/O failure on `path` as a resource error.
    pub fn io(action: &str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Error {
            kind: ErrorKind::Resource,
            msg: format!("cannot {} `{}`", action, path.as_ref().display()),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($kind: expr, $($arg: tt)+) => {
        return Err($crate::error::Error::with_message($kind, format!($($arg)+)))
    };
}
