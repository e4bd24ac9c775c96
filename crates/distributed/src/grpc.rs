//! gRPC glue for the exchange transport.
//!
//! RPC schema source: `proto/graphex_exchange.proto`.
//!
//! Every worker serves [`ExchangeServiceServer`] on its node-table address;
//! inbound RPCs land in the worker's [`InboundRegistry`]. [`GrpcTransport`]
//! is the client side: one blocking delivery attempt per call, driven on a
//! runtime it owns so exchange operators can stay on plain threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use graphex_common::{ChannelId, ExchangeConfig, GraphexError};
use tokio::runtime::Runtime;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::inbound::InboundRegistry;
use crate::messenger::{Envelope, MessageKind, MessageTransport};
use crate::partition::NodeTable;

#[allow(missing_docs)]
pub mod v1 {
    tonic::include_proto!("graphex.exchange.v1");
}

pub use v1::exchange_service_client::ExchangeServiceClient;
pub use v1::exchange_service_server::{ExchangeService, ExchangeServiceServer};

/// Room for the channel id, round and source around a payload.
const FRAME_HEADROOM: usize = 64 * 1024;

/// Largest protobuf frame a worker sends or accepts for `config`.
pub fn frame_limit(config: &ExchangeConfig) -> usize {
    config.max_message_bytes.saturating_add(FRAME_HEADROOM)
}

#[derive(Debug, Clone)]
/// Server side: hands every inbound RPC to the local registry.
pub struct ExchangeServiceImpl {
    registry: Arc<InboundRegistry>,
}

impl ExchangeServiceImpl {
    pub fn new(registry: Arc<InboundRegistry>) -> Self {
        Self { registry }
    }

    /// Wraps the service in a server that accepts payloads up to the
    /// configured message size instead of tonic's 4 MiB default.
    pub fn into_server(self, config: &ExchangeConfig) -> ExchangeServiceServer<Self> {
        let limit = frame_limit(config);
        ExchangeServiceServer::new(self)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit)
    }

    fn accept(
        &self,
        channel_id: String,
        round: u64,
        kind: MessageKind,
        payload: String,
        source: Option<u32>,
    ) -> Result<Response<v1::Ack>, Status> {
        if channel_id.is_empty() {
            return Err(to_status(GraphexError::Codec(
                "exchange message without channel id".to_string(),
            )));
        }
        self.registry.deliver(Envelope {
            channel: ChannelId(channel_id),
            round,
            kind,
            payload,
            source: source.map(|s| s as usize),
        });
        Ok(Response::new(v1::Ack {}))
    }
}

#[tonic::async_trait]
impl ExchangeService for ExchangeServiceImpl {
    async fn send_message(
        &self,
        request: Request<v1::MessageRequest>,
    ) -> Result<Response<v1::Ack>, Status> {
        let req = request.into_inner();
        self.accept(req.channel_id, req.round, MessageKind::Data, req.payload, None)
    }

    async fn send_message_with_source(
        &self,
        request: Request<v1::SourcedMessageRequest>,
    ) -> Result<Response<v1::Ack>, Status> {
        let req = request.into_inner();
        self.accept(
            req.channel_id,
            req.round,
            MessageKind::Data,
            req.payload,
            Some(req.source),
        )
    }

    async fn send_signal(
        &self,
        request: Request<v1::MessageRequest>,
    ) -> Result<Response<v1::Ack>, Status> {
        let req = request.into_inner();
        self.accept(req.channel_id, req.round, MessageKind::Signal, req.payload, None)
    }

    async fn send_signal_with_source(
        &self,
        request: Request<v1::SourcedMessageRequest>,
    ) -> Result<Response<v1::Ack>, Status> {
        let req = request.into_inner();
        self.accept(
            req.channel_id,
            req.round,
            MessageKind::Signal,
            req.payload,
            Some(req.source),
        )
    }
}

fn to_status(err: GraphexError) -> Status {
    match err {
        GraphexError::InvalidConfig(msg) => Status::invalid_argument(msg),
        GraphexError::Routing(msg) => Status::failed_precondition(msg),
        GraphexError::Transport(msg) => Status::unavailable(msg),
        GraphexError::Codec(msg) => Status::invalid_argument(msg),
        GraphexError::Execution(msg) => Status::internal(msg),
        GraphexError::Io(e) => Status::internal(e.to_string()),
    }
}

/// Blocking gRPC client transport over the node table's addresses.
///
/// Must not be called from inside an async context: each delivery blocks on
/// the transport's own runtime.
pub struct GrpcTransport {
    runtime: Runtime,
    endpoints: Vec<String>,
    frame_limit: usize,
    clients: Mutex<HashMap<usize, ExchangeServiceClient<Channel>>>,
}

impl std::fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("endpoints", &self.endpoints)
            .field("frame_limit", &self.frame_limit)
            .finish()
    }
}

impl GrpcTransport {
    pub fn new(nodes: &NodeTable, config: &ExchangeConfig) -> graphex_common::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("graphex-grpc-client")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            endpoints: nodes.iter().map(|n| endpoint_uri(&n.address)).collect(),
            frame_limit: frame_limit(config),
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, target: usize) -> graphex_common::Result<ExchangeServiceClient<Channel>> {
        let mut clients = self.clients.lock().expect("grpc client cache lock poisoned");
        if let Some(client) = clients.get(&target) {
            return Ok(client.clone());
        }
        let uri = self
            .endpoints
            .get(target)
            .ok_or_else(|| GraphexError::Transport(format!("unknown worker index {target}")))?;
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| GraphexError::InvalidConfig(format!("bad worker address {uri}: {e}")))?;
        let _guard = self.runtime.enter();
        let client = ExchangeServiceClient::new(endpoint.connect_lazy())
            .max_encoding_message_size(self.frame_limit)
            .max_decoding_message_size(self.frame_limit);
        debug!(peer = target, uri = %uri, "created exchange client");
        clients.insert(target, client.clone());
        Ok(client)
    }
}

fn endpoint_uri(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

impl MessageTransport for GrpcTransport {
    fn deliver(&self, target: usize, envelope: &Envelope) -> graphex_common::Result<()> {
        let mut client = self.client(target)?;
        let channel_id = envelope.channel.as_str().to_string();
        let round = envelope.round;
        let payload = envelope.payload.clone();
        let result = self.runtime.block_on(async move {
            match (envelope.kind, envelope.source) {
                (MessageKind::Data, None) => client
                    .send_message(v1::MessageRequest {
                        channel_id,
                        round,
                        payload,
                    })
                    .await
                    .map(|_| ()),
                (MessageKind::Data, Some(source)) => client
                    .send_message_with_source(v1::SourcedMessageRequest {
                        channel_id,
                        round,
                        payload,
                        source: source as u32,
                    })
                    .await
                    .map(|_| ()),
                (MessageKind::Signal, None) => client
                    .send_signal(v1::MessageRequest {
                        channel_id,
                        round,
                        payload,
                    })
                    .await
                    .map(|_| ()),
                (MessageKind::Signal, Some(source)) => client
                    .send_signal_with_source(v1::SourcedMessageRequest {
                        channel_id,
                        round,
                        payload,
                        source: source as u32,
                    })
                    .await
                    .map(|_| ()),
            }
        });
        result.map_err(|status| {
            GraphexError::Transport(format!(
                "worker {target} rejected {} message: {}",
                envelope.kind.as_str(),
                status.message()
            ))
        })
    }
}
