//! TLS for the node connection.
//!
//! The node presents its own self-signed certificate, which is flagged as a
//! CA. Standard chain verification rejects such a certificate as an end
//! entity, so a presented certificate that is byte-for-byte one of the
//! configured anchors is accepted directly. Anything else must chain to the
//! anchors and match the server name.

use crate::error::{RpcError, RpcResult};
use hyper_util::rt::TokioIo;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tonic::transport::Uri;
use tracing::debug;
use x509_cert::Certificate as X509Certificate;
use x509_cert::der::Decode;

/// Port the node listens on for gRPC when the endpoint names none.
pub const DEFAULT_RPC_PORT: u16 = 10009;

/// Certificates parsed from the node's `tls.cert`.
#[derive(Clone, Debug)]
pub struct TrustAnchor {
    certificates: Vec<CertificateDer<'static>>,
}

impl TrustAnchor {
    /// Parses every PEM `CERTIFICATE` block. Each block must hold a
    /// well-formed X.509 certificate; other PEM sections are skipped.
    pub fn from_pem(pem: &[u8]) -> RpcResult<Self> {
        let mut certificates = Vec::new();
        for block in CertificateDer::pem_slice_iter(pem) {
            let der = block
                .map_err(|e| RpcError::InvalidCertificate(format!("malformed PEM: {e:?}")))?;
            X509Certificate::from_der(der.as_ref()).map_err(|e| {
                RpcError::InvalidCertificate(format!("not an X.509 certificate: {e}"))
            })?;
            certificates.push(der);
        }

        if certificates.is_empty() {
            return Err(RpcError::InvalidCertificate(
                "no PEM CERTIFICATE block found".into(),
            ));
        }
        Ok(Self { certificates })
    }

    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }
}

/// Accepts the pinned anchors as presented, verifies anything else as a
/// chain. Handshake signatures are always checked.
#[derive(Debug)]
struct PinnedCertVerifier {
    pinned: Vec<CertificateDer<'static>>,
    inner: Arc<WebPkiServerVerifier>,
}

impl PinnedCertVerifier {
    fn new(anchor: &TrustAnchor, provider: Arc<CryptoProvider>) -> RpcResult<Self> {
        let mut roots = RootCertStore::empty();
        let (_, ignored) = roots.add_parsable_certificates(anchor.certificates().iter().cloned());
        if ignored > 0 {
            debug!("{ignored} anchor certificate(s) cannot act as chain roots");
        }

        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| RpcError::InvalidCertificate(format!("unusable trust anchor: {e}")))?;

        Ok(Self {
            pinned: anchor.certificates().to_vec(),
            inner,
        })
    }

    fn is_pinned(&self, end_entity: &CertificateDer<'_>) -> bool {
        self.pinned
            .iter()
            .any(|pinned| pinned.as_ref() == end_entity.as_ref())
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.is_pinned(end_entity) {
            return Ok(ServerCertVerified::assertion());
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Dials the node over TCP and runs the TLS handshake, negotiating HTTP/2.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    domain: Option<ServerName<'static>>,
}

impl TlsConnector {
    /// `domain` overrides the name checked against certificates that are
    /// not pinned; by default the endpoint host is used.
    pub fn new(anchor: &TrustAnchor, domain: Option<&str>) -> RpcResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinnedCertVerifier::new(anchor, provider.clone())?;

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| RpcError::InvalidCertificate(format!("TLS setup failed: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec()];

        let domain = domain
            .map(|name| {
                ServerName::try_from(name.to_string())
                    .map_err(|e| RpcError::InvalidCertificate(format!("invalid TLS domain {name:?}: {e}")))
            })
            .transpose()?;

        Ok(Self {
            config: Arc::new(config),
            domain,
        })
    }

    pub async fn connect(&self, uri: Uri) -> io::Result<TokioIo<TlsStream<TcpStream>>> {
        let host = uri
            .host()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{uri} has no host")))?;
        let port = uri.port_u16().unwrap_or(DEFAULT_RPC_PORT);

        let server_name = match &self.domain {
            Some(name) => name.clone(),
            None => ServerName::try_from(host.to_string())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        };

        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        let tls = tokio_rustls::TlsConnector::from(self.config.clone())
            .connect(server_name, tcp)
            .await?;
        debug!("TLS established with {host}:{port}");
        Ok(TokioIo::new(tls))
    }
}
