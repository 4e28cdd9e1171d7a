//! Socket listeners for the proxy's front door and worker endpoint.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use katana_config::SocketEndpoint;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use super::{PROXY_TARGET, ServerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

/// Byte stream accepted by a listener.
pub(crate) trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub(crate) type BoxedConnection = Box<dyn Connection>;

/// Listener bound to a socket endpoint.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl SocketListener {
    /// Binds `endpoint`, replacing a stale Unix socket file.
    ///
    /// Must be called inside a Tokio runtime.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ServerError> {
        let register = |source| ServerError::Register {
            endpoint: endpoint.to_string(),
            source,
        };
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let listener = bind_tcp(host, *port)?;
                listener.set_nonblocking(true).map_err(register)?;
                let listener = tokio::net::TcpListener::from_std(listener).map_err(register)?;
                Ok(Self {
                    endpoint: endpoint.clone(),
                    listener: ListenerKind::Tcp(listener),
                })
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    let listener = bind_unix(path.as_std_path())?;
                    let listener = listener
                        .set_nonblocking(true)
                        .and_then(|()| tokio::net::UnixListener::from_std(listener));
                    match listener {
                        Ok(listener) => Ok(Self {
                            endpoint: endpoint.clone(),
                            listener: ListenerKind::Unix(listener),
                        }),
                        Err(source) => {
                            cleanup_unix_socket(endpoint);
                            Err(register(source))
                        }
                    }
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(ServerError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    })
                }
            }
        }
    }

    /// The endpoint clients must connect to.
    ///
    /// For TCP this carries the port actually bound, which differs from the
    /// configured one when port 0 was requested.
    pub(crate) fn local_endpoint(&self) -> Result<SocketEndpoint, ServerError> {
        match &self.listener {
            ListenerKind::Tcp(listener) => {
                let addr = listener
                    .local_addr()
                    .map_err(|source| ServerError::LocalAddr {
                        endpoint: self.endpoint.to_string(),
                        source,
                    })?;
                Ok(SocketEndpoint::tcp(addr.ip().to_string(), addr.port()))
            }
            #[cfg(unix)]
            ListenerKind::Unix(_) => Ok(self.endpoint.clone()),
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<BoxedConnection> {
        match &self.listener {
            ListenerKind::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Removes the socket file of a Unix listener.
    pub(crate) fn cleanup(&self) {
        #[cfg(unix)]
        cleanup_unix_socket(&self.endpoint);
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<std::net::TcpListener, ServerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| ServerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    std::net::TcpListener::bind(addr).map_err(|source| ServerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<std::os::unix::net::UnixListener, ServerError> {
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| ServerError::UnixMetadata {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ServerError::UnixNotSocket {
                path: path.display().to_string(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ServerError::UnixInUse {
                    path: path.display().to_string(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| ServerError::UnixCleanup {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            Err(error) => {
                return Err(ServerError::UnixConnect {
                    path: path.display().to_string(),
                    source: error,
                });
            }
        }
    }

    std::os::unix::net::UnixListener::bind(path).map_err(|source| ServerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let SocketEndpoint::Unix { path } = endpoint else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: PROXY_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn tcp_listeners_report_the_bound_port() {
        let listener = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind");
        let endpoint = listener.local_endpoint().expect("local endpoint");
        let SocketEndpoint::Tcp { host, port } = &endpoint else {
            panic!("expected a tcp endpoint, got {endpoint}");
        };
        assert_eq!(host, "127.0.0.1");
        assert_ne!(*port, 0);

        let client = tokio::net::TcpStream::connect((host.as_str(), *port));
        let (client, accepted) = tokio::join!(client, listener.accept());
        client.expect("connect");
        accepted.expect("accept");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_unix_sockets_are_replaced() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("katana.sock");
        {
            let _stale = std::os::unix::net::UnixListener::bind(&path).expect("bind stale");
        }
        assert!(path.exists(), "stale socket should remain");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let listener = SocketListener::bind(&endpoint).expect("bind over stale socket");
        tokio::net::UnixStream::connect(&path)
            .await
            .expect("connect unix client");

        listener.cleanup();
        assert!(!path.exists(), "cleanup removes the socket file");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_sockets_in_use_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("katana.sock");
        let _existing = std::os::unix::net::UnixListener::bind(&path).expect("bind existing");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let error = SocketListener::bind(&endpoint).expect_err("socket is live");
        assert!(matches!(error, ServerError::UnixInUse { .. }));
        assert!(error.is_address_in_use());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regular_files_are_not_replaced() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("katana.sock");
        fs::write(&path, b"not a socket").expect("write file");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let error = SocketListener::bind(&endpoint).expect_err("file is not a socket");
        assert!(matches!(error, ServerError::UnixNotSocket { .. }));
        assert!(path.exists());
    }
}
