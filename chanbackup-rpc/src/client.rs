//! gRPC client for the node's backup calls.
//!
//! Calls go through a raw [`tonic::client::Grpc`] over a TLS channel wrapped
//! in the macaroon interceptor, with the message types from [`crate::proto`].
//! TLS is negotiated by [`crate::tls::TlsConnector`]; tonic only sees the
//! decrypted stream and a plain `http://` endpoint.

use crate::credentials::{CompositeCredential, MacaroonInterceptor};
use crate::error::{RpcError, RpcResult};
use crate::proto::{
    ChanBackupExportRequest, ChanBackupSnapshot, ChannelBackupSubscription, GetInfoRequest,
    GetInfoResponse, EXPORT_ALL_CHANNEL_BACKUPS_PATH, GET_INFO_PATH,
    SUBSCRIBE_CHANNEL_BACKUPS_PATH,
};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use serde::{Deserialize, Serialize};
use std::task::Poll;
use std::time::Duration;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::StdError;
use tonic::codegen::http::uri::{InvalidUri, PathAndQuery};
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Request, Status};
use tower::service_fn;
use tracing::debug;

/// Channel with the macaroon attached to every call.
pub type AuthenticatedChannel = InterceptedService<Channel, MacaroonInterceptor>;

/// Raw backup snapshots pushed by the node.
pub type BackupUpdates = BoxStream<'static, Result<ChanBackupSnapshot, Status>>;

/// Connection tuning for the node's gRPC endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Timeout for establishing the TCP + TLS connection (seconds).
    pub connect_timeout_secs: u64,

    /// HTTP/2 keep-alive ping interval (seconds). Detects dead subscriptions
    /// that would otherwise wait forever.
    pub keep_alive_interval_secs: u64,

    /// How long to wait for a keep-alive ack before dropping the connection (seconds).
    pub keep_alive_timeout_secs: u64,

    /// Deadline for unary calls (seconds). Not applied to the subscription.
    pub call_timeout_secs: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keep_alive_interval_secs: 30,
            keep_alive_timeout_secs: 20,
            call_timeout_secs: 60,
        }
    }
}

/// Adds the `https://` scheme when the endpoint is a bare `host:port`.
pub fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Authenticated client for the backup-related `lnrpc.Lightning` calls.
#[derive(Clone)]
pub struct LightningClient {
    grpc: Grpc<AuthenticatedChannel>,
    call_timeout: Duration,
}

impl LightningClient {
    /// Opens a TLS connection to `endpoint` using the composite credential.
    pub async fn connect(
        endpoint: &str,
        credential: &CompositeCredential,
        options: &ConnectOptions,
    ) -> RpcResult<Self> {
        let uri = normalize_endpoint(endpoint);
        let invalid = |reason: String| RpcError::InvalidEndpoint {
            endpoint: uri.clone(),
            reason,
        };
        let parsed: Uri = uri.parse().map_err(|e: InvalidUri| invalid(e.to_string()))?;
        let authority = parsed
            .authority()
            .ok_or_else(|| invalid("missing host".into()))?;

        let endpoint = Endpoint::from_shared(format!("http://{authority}"))
            .map_err(|e| invalid(e.to_string()))?
            .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
            .http2_keep_alive_interval(Duration::from_secs(options.keep_alive_interval_secs))
            .keep_alive_timeout(Duration::from_secs(options.keep_alive_timeout_secs))
            .keep_alive_while_idle(true);

        let connector = credential.connector();
        let channel = endpoint
            .connect_with_connector(service_fn(move |uri: Uri| {
                let connector = connector.clone();
                async move { connector.connect(uri).await }
            }))
            .await?;
        debug!("connected to {uri}");

        Ok(Self {
            grpc: Grpc::new(InterceptedService::new(channel, credential.interceptor())),
            call_timeout: Duration::from_secs(options.call_timeout_secs),
        })
    }

    pub async fn get_info(&self) -> RpcResult<GetInfoResponse> {
        self.unary(GET_INFO_PATH, GetInfoRequest {}).await
    }

    pub async fn export_all_channel_backups(&self) -> RpcResult<ChanBackupSnapshot> {
        self.unary(EXPORT_ALL_CHANNEL_BACKUPS_PATH, ChanBackupExportRequest {})
            .await
    }

    /// Opens the server-push backup subscription. The stream has no
    /// resumption token and only ends when the node or the transport closes it.
    ///
    /// The request is on the connection when this returns, ahead of any call
    /// made afterwards. The node sends response headers only with its first
    /// update, so the response itself is awaited by the returned stream.
    pub async fn subscribe_channel_backups(&self) -> RpcResult<BackupUpdates> {
        let mut grpc = self.ready().await?;
        let mut call = Box::pin(async move {
            grpc.server_streaming(
                Request::new(ChannelBackupSubscription {}),
                PathAndQuery::from_static(SUBSCRIBE_CHANNEL_BACKUPS_PATH),
                ProstCodec::default(),
            )
            .await
        });

        // The first poll hands the request to the channel.
        if let Poll::Ready(response) = futures::poll!(call.as_mut()) {
            return Ok(response?.into_inner().boxed());
        }

        Ok(stream::once(call)
            .flat_map(|response| match response {
                Ok(response) => response.into_inner().boxed(),
                Err(status) => stream::once(future::ready(Err(status))).boxed(),
            })
            .boxed())
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> RpcResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let mut request = Request::new(message);
        request.set_timeout(self.call_timeout);
        let response = grpc
            .unary(request, PathAndQuery::from_static(path), ProstCodec::default())
            .await?;
        Ok(response.into_inner())
    }

    async fn ready(&self) -> RpcResult<Grpc<AuthenticatedChannel>> {
        let mut grpc = self.grpc.clone();
        grpc.ready().await.map_err(|e| {
            let e: StdError = e.into();
            Status::unavailable(format!("service was not ready: {e}"))
        })?;
        Ok(grpc)
    }
}
