//! Socket endpoints for the component front door and its worker channel.

use std::fmt;
use std::fs::DirBuilder;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Suffix appended to the front-door path to derive the worker channel path.
pub const WORKER_SOCKET_SUFFIX: &str = ".workers";

/// Address a component listens on.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Unix domain socket endpoint.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
    /// TCP socket endpoint.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number; zero asks the OS for a free port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the Unix socket path when the endpoint uses the Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Internal endpoint the proxy uses to reach its worker processes.
    ///
    /// Unix endpoints gain a `.workers` suffix next to the front door. TCP
    /// endpoints use an ephemeral loopback port, resolved once bound.
    #[must_use]
    pub fn worker_endpoint(&self) -> Self {
        match self {
            Self::Unix { path } => Self::unix(format!("{path}{WORKER_SOCKET_SUFFIX}")),
            Self::Tcp { .. } => Self::tcp("127.0.0.1", 0),
        }
    }

    /// Ensures the socket's parent directory exists with restrictive permissions.
    ///
    /// # Errors
    ///
    /// Fails when the path has no parent or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) else {
            return Err(SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(SocketParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Scheme was not recognised.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing socket directories.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// Parent directory is missing when creating a Unix socket path.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Configured socket path.
        path: Utf8PathBuf,
    },
    /// Failed to create or adjust socket directories.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("unix:///tmp/katana/echo.sock", SocketEndpoint::unix("/tmp/katana/echo.sock"))]
    #[case("tcp://127.0.0.1:9000", SocketEndpoint::tcp("127.0.0.1", 9000))]
    fn parses_and_displays(#[case] text: &str, #[case] expected: SocketEndpoint) {
        let endpoint: SocketEndpoint = text.parse().expect("parse endpoint");
        assert_eq!(endpoint, expected);
        assert_eq!(endpoint.to_string(), text);
    }

    #[rstest]
    #[case("udp://127.0.0.1:9000")]
    #[case("tcp://127.0.0.1")]
    #[case("not a url")]
    fn rejects_unusable_addresses(#[case] text: &str) {
        assert!(text.parse::<SocketEndpoint>().is_err());
    }

    #[test]
    fn worker_endpoint_sits_next_to_unix_front_door() {
        let endpoint = SocketEndpoint::unix("/run/katana/echo.sock");
        assert_eq!(
            endpoint.worker_endpoint(),
            SocketEndpoint::unix("/run/katana/echo.sock.workers")
        );
    }

    #[test]
    fn worker_endpoint_uses_ephemeral_loopback_for_tcp() {
        let endpoint = SocketEndpoint::tcp("0.0.0.0", 5000);
        assert_eq!(endpoint.worker_endpoint(), SocketEndpoint::tcp("127.0.0.1", 0));
    }

    #[test]
    fn prepares_parent_directory() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let socket = Utf8PathBuf::from_path_buf(temp.path().join("nested/echo.sock"))
            .expect("utf8 path");
        let endpoint = SocketEndpoint::unix(socket.clone());
        endpoint.prepare_filesystem().expect("prepare");
        assert!(socket.parent().is_some_and(|parent| parent.is_dir()));
    }

    #[test]
    fn bare_socket_names_have_no_parent() {
        let endpoint = SocketEndpoint::unix("echo.sock");
        assert!(matches!(
            endpoint.prepare_filesystem(),
            Err(SocketPreparationError::MissingParent { .. })
        ));
    }
}
