//! Per-query runtime context of one worker.
//!
//! Responsibilities:
//! - hold the worker's identity and the shared read-only node table;
//! - own the messenger, the inbound channel registry and the vertex cache;
//! - mint channel ids in plan-construction order so the same Send/Receive
//!   pair gets the same id on every worker.

use std::sync::Arc;

use graphex_common::{ChannelId, ChannelIdGenerator, ExchangeConfig, GraphexError, QueryId, Result};
use graphex_execution::BoundedBuffer;
use graphex_record::{InMemoryVertexCache, RawRecord, VertexCache};

use crate::inbound::InboundRegistry;
use crate::messenger::{InProcessTransport, MessageTransport, Messenger};
use crate::partition::NodeTable;

#[derive(Debug, Clone)]
/// Worker identity and exchange settings.
pub struct WorkerConfig {
    /// This worker's index in the node table.
    pub task_index: usize,
    /// Query whose plan this worker executes.
    pub query_id: QueryId,
    pub exchange: ExchangeConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_index: 0,
            query_id: QueryId("query".to_string()),
            exchange: ExchangeConfig::default(),
        }
    }
}

/// Everything an exchange operator needs from its worker.
pub struct WorkerContext {
    task_index: usize,
    nodes: NodeTable,
    messenger: Messenger,
    inbound: Arc<InboundRegistry>,
    vertex_cache: Arc<dyn VertexCache>,
    channel_ids: ChannelIdGenerator,
    config: ExchangeConfig,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("task_index", &self.task_index)
            .field("nodes", &self.nodes.len())
            .field("query_id", self.channel_ids.query_id())
            .finish()
    }
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        nodes: NodeTable,
        transport: Arc<dyn MessageTransport>,
        inbound: Arc<InboundRegistry>,
        vertex_cache: Arc<dyn VertexCache>,
    ) -> Result<Arc<Self>> {
        config.exchange.validate()?;
        if config.task_index >= nodes.len() {
            return Err(GraphexError::InvalidConfig(format!(
                "task index {} outside node table of {} nodes",
                config.task_index,
                nodes.len()
            )));
        }
        if inbound.task_index() != config.task_index {
            return Err(GraphexError::InvalidConfig(format!(
                "inbound registry belongs to worker {}, not {}",
                inbound.task_index(),
                config.task_index
            )));
        }
        Ok(Arc::new(Self {
            task_index: config.task_index,
            messenger: Messenger::new(config.task_index, transport, &config.exchange),
            nodes,
            inbound,
            vertex_cache,
            channel_ids: ChannelIdGenerator::new(config.query_id),
            config: config.exchange,
        }))
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn inbound(&self) -> &Arc<InboundRegistry> {
        &self.inbound
    }

    pub fn vertex_cache(&self) -> &dyn VertexCache {
        self.vertex_cache.as_ref()
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn query_id(&self) -> &QueryId {
        self.channel_ids.query_id()
    }

    pub fn next_channel_id(&self) -> ChannelId {
        self.channel_ids.next_channel_id()
    }

    /// Local buffer sized by `local_buffer_capacity`.
    pub fn new_buffer(&self) -> Arc<BoundedBuffer<RawRecord>> {
        Arc::new(BoundedBuffer::new(self.config.local_buffer_capacity))
    }
}

/// Builds one context per node, all wired to an in-process transport.
pub fn in_process_cluster(
    nodes: NodeTable,
    query_id: QueryId,
    exchange: ExchangeConfig,
) -> Result<Vec<Arc<WorkerContext>>> {
    let (transport, registries) = InProcessTransport::cluster(nodes.len());
    registries
        .into_iter()
        .enumerate()
        .map(|(task_index, inbound)| {
            WorkerContext::new(
                WorkerConfig {
                    task_index,
                    query_id: query_id.clone(),
                    exchange: exchange.clone(),
                },
                nodes.clone(),
                transport.clone(),
                inbound,
                Arc::new(InMemoryVertexCache::new()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graphex_common::{ExchangeConfig, QueryId};
    use graphex_record::InMemoryVertexCache;

    use super::*;
    use crate::messenger::InProcessTransport;
    use crate::partition::{NodePlan, PartitionPlan};

    fn table(n: usize) -> NodeTable {
        NodeTable::new(
            (0..n)
                .map(|i| NodePlan {
                    task_index: i,
                    address: format!("w{i}:7000"),
                    partition_plan: PartitionPlan::Range {
                        start: i as i64,
                        end: i as i64 + 1,
                    },
                })
                .collect(),
        )
        .expect("table")
    }

    #[test]
    fn cluster_contexts_mint_identical_channel_ids() {
        let contexts =
            in_process_cluster(table(3), QueryId("q1".to_string()), ExchangeConfig::default())
                .expect("cluster");
        let ids: Vec<_> = contexts.iter().map(|c| c.next_channel_id()).collect();
        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(contexts[2].task_index(), 2);
        assert_eq!(contexts[0].new_buffer().capacity(), 1024);
    }

    #[test]
    fn context_rejects_mismatched_identity() {
        let (transport, registries) = InProcessTransport::cluster(2);
        let err = WorkerContext::new(
            WorkerConfig {
                task_index: 1,
                ..WorkerConfig::default()
            },
            table(2),
            transport.clone(),
            Arc::clone(&registries[0]),
            Arc::new(InMemoryVertexCache::new()),
        )
        .expect_err("registry of another worker");
        assert!(matches!(err, GraphexError::InvalidConfig(_)));

        assert!(WorkerContext::new(
            WorkerConfig {
                task_index: 5,
                ..WorkerConfig::default()
            },
            table(2),
            transport,
            Arc::new(InboundRegistry::new(5)),
            Arc::new(InMemoryVertexCache::new()),
        )
        .is_err());
    }
}
