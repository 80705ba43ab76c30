//! Frame transports for the backend connection.
//!
//! The client only needs a duplex stream of text frames. Production uses a
//! TLS WebSocket; tests plug in an in-memory channel pair.

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::pin::Pin;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector as TlsConnector};
use tracing::{debug, warn};

use crate::domain::models::BackendConfig;
use crate::domain::ports::BackendError;
use crate::infrastructure::config::validate_backend_url;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = BackendError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Both halves of an open transport.
pub struct FrameChannel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl FrameChannel {
    pub fn new(
        sink: impl Sink<String, Error = BackendError> + Send + 'static,
        stream: impl Stream<Item = Result<String, BackendError>> + Send + 'static,
    ) -> Self {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens fresh transports to the backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<FrameChannel, BackendError>;
}

/// TLS WebSocket connector.
pub struct WebSocketConnector {
    url: Url,
    tls: Arc<ClientConfig>,
}

impl WebSocketConnector {
    /// Build a connector, enforcing the `wss://`-only transport policy.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let url = validate_backend_url(&config.url).map_err(|e| BackendError::Config(e.to_string()))?;
        let tls = tls_config(config.insecure_skip_verify)?;
        Ok(Self {
            url,
            tls: Arc::new(tls),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<FrameChannel, BackendError> {
        debug!(url = %self.url, "opening backend websocket");
        let (ws, _response) = connect_async_tls_with_config(
            self.url.as_str(),
            None,
            true,
            Some(TlsConnector::Rustls(self.tls.clone())),
        )
        .await
        .map_err(|e| BackendError::Connect(format!("{}: {e}", self.url)))?;

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(transport_error)
            .with(|text: String| future::ready(Ok::<_, BackendError>(Message::Text(text))));
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(String::from_utf8(bytes).map_err(|e| {
                    BackendError::Protocol(format!("binary frame is not utf-8: {e}"))
                })),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "backend sent close frame");
                    None
                }
                Ok(_) => None,
                Err(err) => Some(Err(transport_error(err))),
            })
        });

        Ok(FrameChannel::new(sink, stream))
    }
}

fn transport_error(err: tungstenite::Error) -> BackendError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            BackendError::ConnectionClosed
        }
        other => BackendError::Transport(other.to_string()),
    }
}

fn tls_config(insecure_skip_verify: bool) -> Result<ClientConfig, BackendError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| BackendError::Config(format!("TLS setup failed: {e}")))?;

    let config = if insecure_skip_verify {
        warn!("backend certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Accepts self-signed appliance certificates. Handshake signatures are
/// still checked, so the session stays encrypted to whoever holds the key.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
