//! In-process `lnrpc.Lightning` node served over TLS.

#![allow(dead_code)]

use chanbackup_rpc::proto::{
    ChanBackupExportRequest, ChanBackupSnapshot, ChannelBackup, ChannelBackupSubscription, ChannelBackups,
    EXPORT_ALL_CHANNEL_BACKUPS_PATH, GET_INFO_PATH, GetInfoRequest, GetInfoResponse, LIGHTNING_SERVICE,
    MultiChanBackup, SUBSCRIBE_CHANNEL_BACKUPS_PATH,
};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::codec::ProstCodec;
use tonic::codegen::{Body, BoxFuture, Context, Poll, Service, StdError, empty_body, http};
use tonic::server::{Grpc, NamedService, ServerStreamingService, UnaryService};
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic::{Code, Request, Response, Status};

pub const MACAROON: &[u8] = &[0xDE, 0xAD, 0xBE, 0xEF];
pub const IDENTITY: &str = "02f0e1d2c3b4a5968778695a4b3c2d1e0f";

pub struct ServerCert {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Self-signed and flagged as a CA, the way the node generates `tls.cert`.
pub fn node_certificate() -> ServerCert {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).unwrap();
    ServerCert {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

pub struct CertificateAuthority {
    pub cert_pem: String,
    cert: rcgen::Certificate,
    key: KeyPair,
}

pub fn certificate_authority() -> CertificateAuthority {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["chanbackup-test-ca".to_string()]).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).unwrap();
    CertificateAuthority {
        cert_pem: cert.pem(),
        cert,
        key,
    }
}

/// End-entity certificate for `name`, issued by `ca`.
pub fn leaf_certificate(ca: &CertificateAuthority, name: &str) -> ServerCert {
    let key = KeyPair::generate().unwrap();
    let params = CertificateParams::new(vec![name.to_string()]).unwrap();
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    ServerCert {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

pub fn wire_snapshot(single: &[u8], multi: &[u8]) -> ChanBackupSnapshot {
    ChanBackupSnapshot {
        single_chan_backups: Some(ChannelBackups {
            chan_backups: vec![ChannelBackup {
                chan_point: None,
                chan_backup: single.to_vec(),
            }],
        }),
        multi_chan_backup: Some(MultiChanBackup {
            chan_points: Vec::new(),
            multi_chan_backup: multi.to_vec(),
        }),
    }
}

/// One request as the node saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub path: String,
    pub macaroon: Option<String>,
}

struct NodeState {
    identity: String,
    export: ChanBackupSnapshot,
    calls: Mutex<Vec<Call>>,
    updates: Mutex<Option<mpsc::Receiver<ChanBackupSnapshot>>>,
}

pub struct FakeNode {
    pub addr: SocketAddr,
    state: Arc<NodeState>,
    updates: mpsc::Sender<ChanBackupSnapshot>,
}

impl FakeNode {
    pub async fn start(cert: &ServerCert, export: ChanBackupSnapshot) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let (tx, rx) = mpsc::channel(16);
        let state = Arc::new(NodeState {
            identity: IDENTITY.to_string(),
            export,
            calls: Mutex::new(Vec::new()),
            updates: Mutex::new(Some(rx)),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tls = ServerTlsConfig::new().identity(Identity::from_pem(&cert.cert_pem, &cert.key_pem));
        let router = Server::builder()
            .tls_config(tls)
            .unwrap()
            .add_service(LightningService { node: state.clone() });
        tokio::spawn(router.serve_with_incoming(TcpListenerStream::new(listener)));

        Self {
            addr,
            state,
            updates: tx,
        }
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Publishes a backup change to the subscriber.
    pub async fn push(&self, snapshot: ChanBackupSnapshot) {
        self.updates.send(snapshot).await.unwrap();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.path).collect()
    }
}

#[derive(Clone)]
struct LightningService {
    node: Arc<NodeState>,
}

impl NamedService for LightningService {
    const NAME: &'static str = LIGHTNING_SERVICE;
}

impl<B> Service<http::Request<B>> for LightningService
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let path = request.uri().path().to_string();
        let macaroon = request
            .headers()
            .get("macaroon")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.node.calls.lock().unwrap().push(Call {
            path: path.clone(),
            macaroon,
        });

        let node = self.node.clone();
        Box::pin(async move {
            let response = match path.as_str() {
                GET_INFO_PATH => Grpc::new(ProstCodec::default()).unary(GetInfo(node), request).await,
                EXPORT_ALL_CHANNEL_BACKUPS_PATH => {
                    Grpc::new(ProstCodec::default()).unary(Export(node), request).await
                }
                SUBSCRIBE_CHANNEL_BACKUPS_PATH => {
                    Grpc::new(ProstCodec::default())
                        .server_streaming(Subscribe(node), request)
                        .await
                }
                _ => {
                    let mut response = http::Response::new(empty_body());
                    let headers = response.headers_mut();
                    headers.insert("grpc-status", http::HeaderValue::from(Code::Unimplemented as i32));
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        http::HeaderValue::from_static("application/grpc"),
                    );
                    response
                }
            };
            Ok(response)
        })
    }
}

struct GetInfo(Arc<NodeState>);

impl UnaryService<GetInfoRequest> for GetInfo {
    type Response = GetInfoResponse;
    type Future = BoxFuture<Response<GetInfoResponse>, Status>;

    fn call(&mut self, _request: Request<GetInfoRequest>) -> Self::Future {
        let info = GetInfoResponse {
            identity_pubkey: self.0.identity.clone(),
            alias: "fake-node".into(),
            block_height: 800_000,
            version: "0.18.0-beta".into(),
        };
        Box::pin(async move { Ok(Response::new(info)) })
    }
}

struct Export(Arc<NodeState>);

impl UnaryService<ChanBackupExportRequest> for Export {
    type Response = ChanBackupSnapshot;
    type Future = BoxFuture<Response<ChanBackupSnapshot>, Status>;

    fn call(&mut self, _request: Request<ChanBackupExportRequest>) -> Self::Future {
        let export = self.0.export.clone();
        Box::pin(async move { Ok(Response::new(export)) })
    }
}

struct Subscribe(Arc<NodeState>);

impl ServerStreamingService<ChannelBackupSubscription> for Subscribe {
    type Response = ChanBackupSnapshot;
    type ResponseStream = BoxStream<'static, Result<ChanBackupSnapshot, Status>>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, _request: Request<ChannelBackupSubscription>) -> Self::Future {
        let updates = self.0.updates.lock().unwrap().take();
        Box::pin(async move {
            let Some(mut updates) = updates else {
                return Err(Status::already_exists("already subscribed"));
            };
            // Response headers go out with the first update, as on the node.
            let first = updates
                .recv()
                .await
                .ok_or_else(|| Status::unavailable("node shutting down"))?;
            let stream = stream::once(async move { Ok(first) })
                .chain(ReceiverStream::new(updates).map(Ok))
                .boxed();
            Ok(Response::new(stream))
        })
    }
}
