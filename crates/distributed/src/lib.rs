//! Exchange layer between the workers of one distributed graph query.
//!
//! Architecture role:
//! - route records to the worker owning their partition key;
//! - pair every Send operator with a Receive operator that terminates on an
//!   all-signaled barrier;
//! - merge partial aggregates on a single target worker.
//!
//! Key modules:
//! - [`partition`]: node table, partition functions and routers
//! - [`messenger`]: retrying point-to-point delivery over a [`MessageTransport`]
//! - [`inbound`]: per-channel inbound queues keyed by channel id
//! - [`worker`]: per-worker query context
//! - [`send`] / [`receive`]: the exchange operator pair
//! - [`aggregate`]: partial aggregate states and their coordinator
//! - `grpc`: tonic transport (feature `grpc`)
//!
//! Feature flags:
//! - `grpc`: enables the tonic server/client transport and the worker binary.
//! - `profiling`: enables the metrics HTTP exporter from `graphex-common`.

pub mod aggregate;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod inbound;
pub mod messenger;
pub mod partition;
pub mod receive;
pub mod send;
pub mod worker;

#[cfg(test)]
#[path = "exchange_tests.rs"]
mod exchange_tests;

pub use aggregate::{AggregateState, AggregateTargetPolicy, AggregationCoordinator};
#[cfg(feature = "grpc")]
pub use grpc::{ExchangeServiceImpl, GrpcTransport};
pub use inbound::{InboundChannel, InboundEvent, InboundMessage, InboundRegistry};
pub use messenger::{Envelope, InProcessTransport, MessageKind, MessageTransport, Messenger};
pub use partition::{
    EdgeEndpointExtractor, NodePlan, NodeTable, ParseOrHashPartitionFunction, PartitionFunction,
    PartitionKeyExtractor, PartitionPlan, PartitionRouter, SlotValueExtractor, TraversalDirection,
};
pub use receive::{exchange, exchange_with, ReceiveOperator};
pub use send::{CompletionSignal, SendOperator, SendPolicy, UNSET_TASK};
pub use worker::{in_process_cluster, WorkerConfig, WorkerContext};
