//! Accept loop: binds a TCP listener, optionally wraps each accepted
//! stream in TLS, and hands the pair of halves to the connection handler.
//! The listener itself does not own connection state; it only mints
//! connection ids and forwards streams.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use socket2::{Domain, Socket, Type};
use tokio::io::split;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use chat_common::constants::LISTEN_BACKLOG;
use chat_common::error::ChatError;

use crate::handler::run_connection;
use crate::state::AppState;

/// A loaded server certificate/key pair, ready to accept TLS handshakes.
/// Cheap to clone: the acceptor is an `Arc<rustls::ServerConfig>` wrapper.
#[derive(Clone)]
pub struct TlsMaterial {
    acceptor: TlsAcceptor,
}

/// Loads a PEM certificate chain and private key from disk and builds a
/// server TLS acceptor that presents them unconditionally (no client
/// certificate verification; clients decide for themselves whether to
/// trust it, per §6 of the protocol).
pub fn load_tls(cert_path: &Path, key_path: &Path) -> Result<TlsMaterial, ChatError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(ChatError::Tls)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(ChatError::Tls)?;

    Ok(TlsMaterial {
        acceptor: TlsAcceptor::from(Arc::new(config)),
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ChatError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ChatError::Io)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ChatError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        ChatError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("no private key found in {}", path.display()),
        ))
    })
}

/// Binds a TCP listener at `host:port` with the configured accept backlog.
/// Uses `socket2` rather than `TcpListener::bind` directly because tokio's
/// bind does not expose a way to set the backlog.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ChatError> {
    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        ChatError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid bind address {host}:{port}: {e}"),
        ))
    })?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG as i32)?;

    TcpListener::from_std(socket.into()).map_err(ChatError::Io)
}

/// Runs the accept loop until `shutdown` flips to `true`. Each accepted
/// connection is handed its own task and a clone of `shutdown`, so a
/// supervisor-level shutdown unwinds every live connection through its
/// normal cleanup path (§5) rather than severing sockets out from under
/// them.
pub async fn run(
    tcp_listener: TcpListener,
    tls: Option<TlsMaterial>,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                info!("listener stopped accepting new connections");
                return;
            }
            accepted = tcp_listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        error!(%error, "accept failed");
                        continue;
                    }
                };

                let id = state.connections.next_id();
                let state = state.clone();
                let tls = tls.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(async move {
                    accept_connection(state, id, peer_addr, stream, tls, shutdown).await;
                });
            }
        }
    }
}

async fn accept_connection(
    state: AppState,
    id: u64,
    peer_addr: SocketAddr,
    stream: tokio::net::TcpStream,
    tls: Option<TlsMaterial>,
    shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);

    match tls {
        Some(tls) => match tls.acceptor.accept(stream).await {
            Ok(tls_stream) => {
                let (reader, writer) = split(tls_stream);
                run_connection(state, id, peer_addr, reader, writer, shutdown).await;
            }
            Err(error) => {
                warn!(%error, %peer_addr, "TLS handshake failed, dropping connection");
            }
        },
        None => {
            let (reader, writer) = stream.into_split();
            run_connection(state, id, peer_addr, reader, writer, shutdown).await;
        }
    }
}
