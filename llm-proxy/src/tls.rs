//! Listener TLS termination. Grounded on the teacher's own
//! `transport::tls` module: a `rustls::ServerConfig` built once at startup
//! from PEM cert/key files and handed to a `tokio_rustls::TlsAcceptor` that
//! wraps each accepted connection before axum ever sees it.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::config::TlsMinVersion;

/// Loads a cert chain and private key from PEM files and builds a
/// `ServerConfig` restricted to the configured minimum protocol version.
/// No client-cert verification: this proxy authenticates at the
/// application layer (bearer tokens), not via mTLS.
pub fn load_server_config(cert_path: &Path, key_path: &Path, min_version: TlsMinVersion) -> anyhow::Result<Arc<ServerConfig>> {
	let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<Vec<_>, _>>()?;
	if certs.is_empty() {
		anyhow::bail!("no certificates found in {}", cert_path.display());
	}
	let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(key_path)?)).collect::<Result<Vec<_>, _>>()?;
	let key = keys.pop().ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

	let versions: &[&rustls::SupportedProtocolVersion] = match min_version {
		TlsMinVersion::Tls12 => &[&rustls::version::TLS12, &rustls::version::TLS13],
		TlsMinVersion::Tls13 => &[&rustls::version::TLS13],
	};

	let config = ServerConfig::builder_with_protocol_versions(versions)
		.with_no_client_auth()
		.with_single_cert(certs, rustls::pki_types::PrivateKeyDer::Pkcs8(key))?;
	Ok(Arc::new(config))
}

/// An `axum::serve::Listener` that terminates TLS on every accepted
/// connection before handing the plaintext stream to axum. A connection
/// that fails its handshake (stray plaintext probe, expired client clock,
/// ...) is dropped and accept moves on to the next one rather than
/// poisoning the whole listener.
pub struct TlsListener {
	tcp: TcpListener,
	acceptor: TlsAcceptor,
}

impl TlsListener {
	pub fn new(tcp: TcpListener, config: Arc<ServerConfig>) -> Self {
		TlsListener {
			tcp,
			acceptor: TlsAcceptor::from(config),
		}
	}
}

impl axum::serve::Listener for TlsListener {
	type Io = TlsStream<TcpStream>;
	type Addr = SocketAddr;

	async fn accept(&mut self) -> (Self::Io, Self::Addr) {
		loop {
			let (stream, addr) = match self.tcp.accept().await {
				Ok(pair) => pair,
				Err(e) => {
					tracing::warn!(error = %e, "tcp accept failed");
					continue;
				}
			};
			match self.acceptor.accept(stream).await {
				Ok(tls_stream) => return (tls_stream, addr),
				Err(e) => {
					tracing::warn!(error = %e, %addr, "tls handshake failed");
					continue;
				}
			}
		}
	}

	fn local_addr(&self) -> io::Result<Self::Addr> {
		self.tcp.local_addr()
	}
}

/// Local newtype around `SocketAddr` so we can implement `Connected` for
/// both the plain TCP listener and [`TlsListener`] without running afoul of
/// the orphan rules (neither `SocketAddr` nor `axum`'s `Connected`/
/// `IncomingStream` types are local to this crate).
#[derive(Clone, Copy, Debug)]
pub struct RemoteAddr(pub SocketAddr);

impl axum::extract::connect_info::Connected<axum::serve::IncomingStream<'_, TcpListener>> for RemoteAddr {
	fn connect_info(stream: axum::serve::IncomingStream<'_, TcpListener>) -> Self {
		RemoteAddr(*stream.remote_addr())
	}
}

impl axum::extract::connect_info::Connected<axum::serve::IncomingStream<'_, TlsListener>> for RemoteAddr {
	fn connect_info(stream: axum::serve::IncomingStream<'_, TlsListener>) -> Self {
		RemoteAddr(*stream.remote_addr())
	}
}
