//! Composite credentials for the node's gRPC interface.
//!
//! A connection needs two proofs: the node's TLS certificate as trust
//! anchor, and a macaroon sent as call metadata. The macaroon is
//! attached by [`MacaroonInterceptor`] on every outgoing call, so calls the
//! transport re-issues or multiplexes are authenticated too.

use crate::error::{RpcError, RpcResult};
use crate::tls::{TlsConnector, TrustAnchor};
use std::fmt;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Metadata key the node reads the macaroon from.
pub const MACAROON_METADATA_KEY: &str = "macaroon";

/// Encodes raw macaroon bytes the way the node expects them on the wire:
/// uppercase hex, no separators.
pub fn encode_macaroon(token: &[u8]) -> String {
    hex::encode_upper(token)
}

/// Appends the hex-encoded macaroon to every outgoing call.
#[derive(Clone)]
pub struct MacaroonInterceptor {
    encoded: String,
    value: AsciiMetadataValue,
}

impl MacaroonInterceptor {
    pub fn new(token: &[u8]) -> RpcResult<Self> {
        if token.is_empty() {
            return Err(RpcError::EmptyToken);
        }
        let encoded = encode_macaroon(token);
        let value = AsciiMetadataValue::try_from(encoded.as_str())
            .map_err(|e| RpcError::InvalidMetadata(e.to_string()))?;
        Ok(Self { encoded, value })
    }

    /// The metadata value attached to each call.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl Interceptor for MacaroonInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(MACAROON_METADATA_KEY, self.value.clone());
        Ok(request)
    }
}

impl fmt::Debug for MacaroonInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacaroonInterceptor")
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

/// TLS connector plus per-call macaroon, assembled once and used for every
/// connection attempt.
#[derive(Clone)]
pub struct CompositeCredential {
    tls: TlsConnector,
    interceptor: MacaroonInterceptor,
}

impl CompositeCredential {
    /// Validates both inputs up front so bad configuration surfaces before
    /// the first call.
    pub fn assemble(cert_pem: &[u8], macaroon: &[u8], tls_domain: Option<&str>) -> RpcResult<Self> {
        let anchor = TrustAnchor::from_pem(cert_pem)?;
        let interceptor = MacaroonInterceptor::new(macaroon)?;
        let tls = TlsConnector::new(&anchor, tls_domain)?;
        Ok(Self { tls, interceptor })
    }

    pub fn connector(&self) -> TlsConnector {
        self.tls.clone()
    }

    pub fn interceptor(&self) -> MacaroonInterceptor {
        self.interceptor.clone()
    }
}

impl fmt::Debug for CompositeCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCredential")
            .field("interceptor", &self.interceptor)
            .finish_non_exhaustive()
    }
}
