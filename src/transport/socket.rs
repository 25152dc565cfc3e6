//! TCP socket setup for packetline transports.
//!
//! Connect, bind and per-stream socket options. Everything after setup is
//! handled by [`Connection`](super::Connection).

use std::io;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};

use crate::core::{TransportError, TransportResult};

/// Options applied to every connected stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm so each packet leaves immediately.
    pub nodelay: bool,
    /// Enable TCP keepalive probes.
    pub keepalive: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: true,
        }
    }
}

impl SocketOptions {
    /// Apply the options to a connected stream.
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_keepalive(self.keepalive)?;
        Ok(())
    }
}

/// Connect to `host:port`, optionally bounded by `timeout`.
///
/// `host` may be a name or an address literal; every resolved address is
/// tried in turn.
pub async fn connect(host: &str, port: u16, timeout: Option<Duration>) -> TransportResult<TcpStream> {
    let connecting = TcpStream::connect((host, port));
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| TransportError::ConnectTimeout(limit))??,
        None => connecting.await?,
    };
    Ok(stream)
}

/// Bind a listening socket on `host:port`.
///
/// Port `0` binds an ephemeral port; read it back with
/// [`TcpListener::local_addr`].
pub async fn bind(host: &str, port: u16) -> TransportResult<TcpListener> {
    Ok(TcpListener::bind((host, port)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() != 0);
    }

    #[tokio::test]
    async fn test_connect_and_apply_options() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect("127.0.0.1", port, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let (accepted, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, stream.local_addr().unwrap());

        let options = SocketOptions::default();
        options.apply(&stream).unwrap();
        options.apply(&accepted).unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());

        let off = SocketOptions {
            nodelay: false,
            keepalive: false,
        };
        off.apply(&stream).unwrap();
        assert!(!stream.nodelay().unwrap());
        assert!(!SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing listens there.
        let port = {
            let listener = bind("127.0.0.1", 0).await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = connect("127.0.0.1", port, None).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn test_bind_in_use() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
