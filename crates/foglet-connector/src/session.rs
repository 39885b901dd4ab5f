//! Connector sessions and the session factory.
//!
//! Sessions speak length-prefixed JSON frames: a `u32` big-endian
//! length followed by that many bytes of JSON. The first frame after
//! connect authenticates the session; every later frame carries one
//! forwarded message.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls_pki_types::ServerName;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use foglet_core::{ConnectorConfig, Message};

use crate::error::{ConnectorError, ConnectorResult};
use crate::truststore::materialize_trust_store;

#[derive(Serialize)]
struct AuthFrame<'a> {
    user: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct MessageFrame<'a> {
    topic: &'a str,
    pass_key: &'a str,
    message: &'a Message,
}

/// Builds authenticated sessions to one connector.
pub struct SessionFactory {
    config: ConnectorConfig,
    /// `None` in dev mode (plaintext transport).
    tls: Option<TlsConnector>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl SessionFactory {
    /// Build a factory for the connector, materializing its trust
    /// store unless dev mode is enabled.
    pub fn create(config: &ConnectorConfig, trust_store_dir: &Path) -> ConnectorResult<Self> {
        let tls = if config.dev_mode_enabled {
            None
        } else {
            let cert = config.cert.as_deref().ok_or_else(|| {
                ConnectorError::Factory(format!("connector {} has no certificate", config.name))
            })?;
            let path = materialize_trust_store(trust_store_dir, &config.name, cert)?;
            Some(tls_connector_from_pem(&path)?)
        };

        Ok(Self {
            config: config.clone(),
            tls,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closing the factory; sessions it produced close with it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Open and authenticate a new session.
    pub async fn open_session(&self) -> ConnectorResult<ConnectorSession> {
        if self.is_closed() {
            return Err(ConnectorError::Closed(self.config.name.clone()));
        }

        let addr = (self.config.host.as_str(), self.config.port);
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| ConnectorError::Session(e.to_string()))?;

        let stream: Box<dyn AsyncWrite + Send + Unpin> = match &self.tls {
            None => Box::new(tcp),
            Some(connector) => {
                let server_name = ServerName::try_from(self.config.host.clone())
                    .map_err(|e| ConnectorError::Factory(e.to_string()))?;
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ConnectorError::Session(e.to_string()))?;
                Box::new(tls_stream)
            }
        };

        let session = ConnectorSession {
            connector_name: self.config.name.clone(),
            writer: Mutex::new(BufWriter::new(stream)),
            closed: AtomicBool::new(false),
        };
        session
            .write_frame(&AuthFrame {
                user: &self.config.user,
                password: &self.config.password,
            })
            .await?;

        debug!(connector = %self.config.name, host = %self.config.host, "connector session opened");
        Ok(session)
    }
}

/// One authenticated session forwarding messages to the remote broker.
pub struct ConnectorSession {
    connector_name: String,
    writer: Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorSession")
            .field("connector_name", &self.connector_name)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ConnectorSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent and terminal.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Forward one message onto the connector topic.
    ///
    /// A transport failure closes the session; the routing watchdog
    /// re-initializes it on the next tick.
    pub async fn publish(
        &self,
        topic: &str,
        pass_key: &str,
        message: &Message,
    ) -> ConnectorResult<()> {
        self.write_frame(&MessageFrame {
            topic,
            pass_key,
            message,
        })
        .await
    }

    async fn write_frame<T: Serialize>(&self, frame: &T) -> ConnectorResult<()> {
        if self.is_closed() {
            return Err(ConnectorError::Closed(self.connector_name.clone()));
        }
        let payload =
            serde_json::to_vec(frame).map_err(|e| ConnectorError::Session(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_u32(payload.len() as u32).await?;
            writer.write_all(&payload).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(connector = %self.connector_name, error = %e, "connector write failed, closing session");
            self.close();
            return Err(ConnectorError::Session(e.to_string()));
        }
        Ok(())
    }
}

/// Load a PEM trust store into a rustls client TLS connector.
fn tls_connector_from_pem(path: &Path) -> ConnectorResult<TlsConnector> {
    let pem = std::fs::read(path).map_err(|e| ConnectorError::TrustStore(e.to_string()))?;
    let mut reader = std::io::BufReader::new(pem.as_slice());

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ConnectorError::TrustStore(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| ConnectorError::TrustStore(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(ConnectorError::TrustStore(format!(
            "no certificates in {}",
            path.display()
        )));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn dev_config(name: &str, port: u16) -> ConnectorConfig {
        ConnectorConfig {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            user: "agent".to_string(),
            password: "secret".to_string(),
            cert: None,
            dev_mode_enabled: true,
        }
    }

    async fn read_frame(stream: &mut tokio::net::TcpStream) -> serde_json::Value {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[tokio::test]
    async fn session_authenticates_then_forwards() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = read_frame(&mut stream).await;
            let forwarded = read_frame(&mut stream).await;
            (auth, forwarded)
        });

        let dir = tempfile::tempdir().unwrap();
        let factory = SessionFactory::create(&dev_config("edge-1", port), dir.path()).unwrap();
        let session = factory.open_session().await.unwrap();

        let message = Message {
            id: "m1".to_string(),
            publisher: "w1".to_string(),
            timestamp: 1_000,
            tag: String::new(),
            content_type: String::new(),
            content: b"payload".to_vec(),
        };
        session.publish("w2", "key", &message).await.unwrap();

        let (auth, forwarded) = server.await.unwrap();
        assert_eq!(auth["user"], "agent");
        assert_eq!(auth["password"], "secret");
        assert_eq!(forwarded["topic"], "w2");
        assert_eq!(forwarded["message"]["publisher"], "w1");
    }

    #[tokio::test]
    async fn unreachable_connector_is_a_session_error() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SessionFactory::create(&dev_config("edge-1", 1), dir.path()).unwrap();
        let err = factory.open_session().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Session(_)));
    }

    #[tokio::test]
    async fn closed_factory_refuses_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SessionFactory::create(&dev_config("edge-1", 1), dir.path()).unwrap();
        factory.close();
        assert!(matches!(
            factory.open_session().await,
            Err(ConnectorError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn closed_session_refuses_publishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let dir = tempfile::tempdir().unwrap();
        let factory = SessionFactory::create(&dev_config("edge-1", port), dir.path()).unwrap();
        let session = factory.open_session().await.unwrap();
        session.close();

        let message = Message {
            id: "m1".to_string(),
            publisher: "w1".to_string(),
            timestamp: 1_000,
            tag: String::new(),
            content_type: String::new(),
            content: Vec::new(),
        };
        assert!(matches!(
            session.publish("w2", "", &message).await,
            Err(ConnectorError::Closed(_))
        ));
    }

    #[test]
    fn non_dev_factory_requires_a_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = dev_config("edge-1", 5671);
        config.dev_mode_enabled = false;
        let err = SessionFactory::create(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConnectorError::Factory(_)));
    }

    #[test]
    fn tls_factory_materializes_the_trust_store() {
        let dir = tempfile::tempdir().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["connector.local".to_string()])
            .unwrap()
            .cert
            .pem();

        let mut config = dev_config("edge-1", 5671);
        config.dev_mode_enabled = false;
        config.cert = Some(cert);

        SessionFactory::create(&config, dir.path()).unwrap();
        assert!(dir.path().join("edge-1.pem").exists());
    }
}
