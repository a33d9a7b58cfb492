//! The concrete `LobbyTransport` (§4.B, component B): a line-oriented
//! TCP socket, optionally wrapped in `rustls`/`tokio-rustls` with the
//! pinning verifier from `interface_adapters::tls`.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::domain::AutohostError;
use crate::interface_adapters::{CertTrustStore, LobbyTransport};
use crate::interface_adapters::tls::PinningVerifier;

enum Socket {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
}

/// A real lobby connection: a `BufReader` over either a plain or
/// TLS-wrapped `TcpStream`, driven one line at a time. Built fresh on
/// every (re)connect attempt by `frameworks::runtime`.
pub struct LobbySocket {
    socket: Socket,
}

impl LobbySocket {
    /// Connects to `host:port`. When `tls` is set, performs the TLS
    /// handshake through `PinningVerifier` so §4.B's pin-or-chain
    /// acceptance rule governs the peer certificate.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: bool,
        trust_store: Arc<std::sync::Mutex<CertTrustStore>>,
    ) -> Result<Self, AutohostError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| AutohostError::Network(format!("connecting to {host}:{port}: {e}")))?;

        if !tls {
            return Ok(Self { socket: Socket::Plain(BufReader::new(tcp)) });
        }

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let verifier = PinningVerifier::new(host, trust_store, Arc::new(roots))
            .map_err(|e| AutohostError::Dependency(format!("building TLS verifier: {e}")))?;

        let mut config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        config.alpn_protocols.clear();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| AutohostError::Configuration(format!("invalid lobby host {host}: {e}")))?;

        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| AutohostError::Certificate { host: format!("{host}: {e}") })?;

        Ok(Self { socket: Socket::Tls(BufReader::new(stream)) })
    }
}

#[async_trait]
impl LobbyTransport for LobbySocket {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        match &mut self.socket {
            Socket::Plain(s) => s.get_mut().write_all(framed.as_bytes()).await,
            Socket::Tls(s) => s.get_mut().write_all(framed.as_bytes()).await,
        }
    }

    async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = match &mut self.socket {
            Socket::Plain(s) => s.read_line(&mut line).await?,
            Socket::Tls(s) => s.read_line(&mut line).await?,
        };
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}
