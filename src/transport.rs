use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Negotiated TLS session details, when the transport carries any.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub protocol: String,
    pub cipher_suite: String,
}

/// The duplex byte stream a client runs over.
///
/// Reading, writing and closing are expressed through the tokio IO traits
/// (`shutdown` plays the role of `close` and is idempotent); this trait adds
/// the endpoint identity the engine reports but never interprets. TLS and
/// the HTTP upgrade both live behind this seam.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {
    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    fn tls_info(&self) -> Option<TlsInfo> {
        None
    }
}

impl Transport for TcpStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

/// In-memory pipe transport, handy for tests and same-process plumbing.
impl Transport for DuplexStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}
