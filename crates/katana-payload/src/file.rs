//! File descriptors attached to requests and service calls.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::payload::Payload;
use crate::protocol::insert;

/// Scheme prefix of files on the local filesystem.
pub const LOCAL_PREFIX: &str = "file://";

/// Scheme prefix of files served by a remote file server.
pub const REMOTE_PREFIX: &str = "http://";

/// Mime type used when none is given.
pub const DEFAULT_MIME: &str = "text/plain";

/// Errors raised by [`File`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FileError {
    /// The path does not start with `file://` or `http://`.
    #[error("Path must begin with file:// or http://: \"{path}\"")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },
    /// The operation needs a file server client, which is not available.
    #[error("remote file access is not supported: \"{path}\"")]
    Remote {
        /// The remote path.
        path: String,
    },
    /// Reading a local file failed.
    #[error("unable to read file \"{path}\": {source}")]
    Read {
        /// The local path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Immutable description of a file.
///
/// Copies with different names or mime types are produced through the
/// `copy_with_*` methods; nothing mutates in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    name: String,
    path: String,
    mime: String,
    filename: Option<String>,
    size: u64,
    token: String,
}

impl File {
    /// Describes the file `name` stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::InvalidPath`] unless `path` is a `file://` or
    /// `http://` URI.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Result<Self, FileError> {
        let path = path.into();
        if !(path.starts_with(LOCAL_PREFIX) || path.starts_with(REMOTE_PREFIX)) {
            return Err(FileError::InvalidPath { path });
        }
        Ok(Self {
            name: name.into(),
            path,
            mime: DEFAULT_MIME.to_owned(),
            filename: None,
            size: 0,
            token: String::new(),
        })
    }

    /// Sets the mime type; empty values keep the default.
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        let mime = mime.into();
        if !mime.is_empty() {
            self.mime = mime;
        }
        self
    }

    /// Sets the original file name.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the size in bytes.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the file server token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Parameter name of the file.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full URI of the file.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mime type.
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Original file name, when known.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// File server token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns `true` for `file://` paths.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.path.starts_with(LOCAL_PREFIX)
    }

    /// Checks that a local file exists.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Remote`] for files on a file server.
    pub fn exists(&self) -> Result<bool, FileError> {
        Ok(Path::new(self.local_path()?).is_file())
    }

    /// Reads the contents of a local file.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Remote`] for remote files and
    /// [`FileError::Read`] when the file cannot be read.
    pub fn read(&self) -> Result<Vec<u8>, FileError> {
        let local = self.local_path()?;
        fs::read(local).map_err(|source| FileError::Read {
            path: local.to_owned(),
            source,
        })
    }

    /// A copy under a different name.
    #[must_use]
    pub fn copy_with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// A copy with a different mime type.
    #[must_use]
    pub fn copy_with_mime(&self, mime: impl Into<String>) -> Self {
        self.clone().with_mime(mime)
    }

    /// Wire representation, with the scheme prefix removed from the path.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let stripped = self
            .path
            .strip_prefix(LOCAL_PREFIX)
            .or_else(|| self.path.strip_prefix(REMOTE_PREFIX))
            .unwrap_or(&self.path);
        let mut payload = Payload::new();
        for (field, value) in [
            ("path", Value::from(stripped)),
            ("mime", Value::from(self.mime.as_str())),
            (
                "filename",
                self.filename.as_deref().map_or(Value::Null, Value::from),
            ),
            ("size", Value::from(self.size)),
            ("token", Value::from(self.token.as_str())),
        ] {
            insert(&mut payload, field, value);
        }
        payload
    }

    /// Rebuilds a file from its wire representation.
    ///
    /// Files read from the wire always live on a file server.
    ///
    /// # Errors
    ///
    /// Propagates [`File::new`] errors.
    pub fn from_payload(name: impl Into<String>, payload: &Payload) -> Result<Self, FileError> {
        let path = payload.get_str("path").unwrap_or_default();
        let mut file = Self::new(name, format!("{REMOTE_PREFIX}{path}"))?
            .with_mime(payload.get_str("mime").unwrap_or_default())
            .with_size(
                payload
                    .get_opt("size")
                    .and_then(Value::as_u64)
                    .unwrap_or_default(),
            )
            .with_token(payload.get_str("token").unwrap_or_default());
        if let Some(filename) = payload.get_str("filename") {
            file = file.with_filename(filename);
        }
        Ok(file)
    }

    fn local_path(&self) -> Result<&str, FileError> {
        self.path
            .strip_prefix(LOCAL_PREFIX)
            .ok_or_else(|| FileError::Remote {
                path: self.path.clone(),
            })
    }
}
