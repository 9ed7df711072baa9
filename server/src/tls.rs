//! HTTPS termination: PEM loading and the accept loop.

use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use gimbal_cam_common::config::TlsConfig;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("no certificates in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key in {0}")]
    NoPrivateKey(PathBuf),
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build an acceptor from the PEM certificate chain and key in `config`.
pub fn load_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;

    let mut server = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    info!(cert = %config.cert_path.display(), "TLS enabled");
    Ok(TlsAcceptor::from(Arc::new(server)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// A client gets this long to finish the TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after an accept error that is not tied to one connection (e.g.
/// out of file descriptors), so the loop does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Accept connections until `shutdown` resolves, handshaking each one on its
/// own task and handing it to `app`.
pub async fn serve_tls<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    serve_tls_with(listener, acceptor, app, shutdown, HANDSHAKE_TIMEOUT).await
}

async fn serve_tls_with<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: F,
    handshake_timeout: Duration,
) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut shutdown => break,
        };
        let (tcp, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) if is_connection_error(&e) => {
                debug!(error = %e, "connection dropped before accept");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "accept failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                    _ = &mut shutdown => break,
                }
            }
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(%peer, "TLS handshake timed out");
                    return;
                }
            };
            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                app.clone().call(req)
            });
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
    info!("TLS listener stopped");
    Ok(())
}

/// Errors that only concern the connection being accepted.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use rcgen::CertifiedKey;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    struct Pem {
        _dir: tempfile::TempDir,
        config: TlsConfig,
        cert: CertificateDer<'static>,
    }

    fn self_signed() -> Pem {
        let CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        Pem {
            _dir: dir,
            config: TlsConfig {
                cert_path,
                key_path,
            },
            cert: cert.der().clone(),
        }
    }

    #[test]
    fn loads_generated_pair() {
        let pem = self_signed();
        assert!(load_acceptor(&pem.config).is_ok());
    }

    #[test]
    fn missing_and_empty_files() {
        let pem = self_signed();

        let missing = TlsConfig {
            cert_path: pem.config.cert_path.with_file_name("nope.pem"),
            key_path: pem.config.key_path.clone(),
        };
        assert!(matches!(load_acceptor(&missing), Err(TlsError::Read { .. })));

        let empty = pem.config.cert_path.with_file_name("empty.pem");
        std::fs::write(&empty, "").unwrap();
        let no_certs = TlsConfig {
            cert_path: empty.clone(),
            key_path: pem.config.key_path.clone(),
        };
        assert!(matches!(load_acceptor(&no_certs), Err(TlsError::NoCertificates(_))));

        // A certificate file holds no key.
        let no_key = TlsConfig {
            cert_path: pem.config.cert_path.clone(),
            key_path: pem.config.cert_path.clone(),
        };
        assert!(matches!(load_acceptor(&no_key), Err(TlsError::NoPrivateKey(_))));
    }

    #[test]
    fn accept_error_classification() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
        ] {
            assert!(is_connection_error(&io::Error::from(kind)));
        }
        // EMFILE and friends must back off instead of spinning.
        assert!(!is_connection_error(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(!is_connection_error(&io::Error::from(io::ErrorKind::OutOfMemory)));
    }

    #[tokio::test]
    async fn silent_client_is_dropped_after_handshake_timeout() {
        let pem = self_signed();
        let acceptor = load_acceptor(&pem.config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_tls_with(
            listener,
            acceptor,
            Router::new(),
            async {
                let _ = stop_rx.await;
            },
            Duration::from_millis(100),
        ));

        // Never send a ClientHello.
        let mut tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), tcp.read(&mut buf))
            .await
            .expect("server should close the idle connection");
        assert!(matches!(read, Ok(0) | Err(_)));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn returns_once_shutdown_resolves() {
        let pem = self_signed();
        let acceptor = load_acceptor(&pem.config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let served = tokio::time::timeout(
            Duration::from_secs(5),
            serve_tls(listener, acceptor, Router::new(), std::future::ready(())),
        )
        .await
        .expect("listener should stop on shutdown");
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn serves_http_over_tls() {
        let pem = self_signed();
        let acceptor = load_acceptor(&pem.config).unwrap();
        let app = Router::new().route("/health", get(|| async { "ok" }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_tls(listener, acceptor, app, async {
            let _ = stop_rx.await;
        }));

        let mut roots = RootCertStore::empty();
        roots.add(pem.cert.clone()).unwrap();
        let client = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client));

        let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        let domain = ServerName::try_from("localhost").unwrap();
        let mut stream = connector.connect(domain, tcp).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        // The server may close without close_notify; the bytes read so far are enough.
        let _ = stream.read_to_end(&mut response).await;
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("ok"), "{response}");

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
