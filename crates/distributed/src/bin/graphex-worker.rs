use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use graphex_common::{ExchangeConfig, QueryId};
use graphex_distributed::grpc::{ExchangeServiceImpl, GrpcTransport};
use graphex_distributed::{
    exchange, AggregateState, AggregateTargetPolicy, AggregationCoordinator, InboundRegistry,
    NodeTable, PartitionPlan, PartitionRouter, SendPolicy, TraversalDirection, WorkerConfig,
    WorkerContext,
};
use graphex_execution::{drain, VecSource};
use graphex_record::{EdgeField, FieldObject, InMemoryVertexCache, RawRecord};
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize_or_default(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

/// One key each partition plan owns.
fn representative_key(plan: &PartitionPlan) -> Option<i64> {
    match plan {
        PartitionPlan::Range { start, end } => (start < end).then_some(*start),
        PartitionPlan::Values { values } => values.iter().next().copied(),
    }
}

/// Routes `count` synthetic edges by sink partition and merges a global count.
fn run_demo(ctx: Arc<WorkerContext>, count: usize) -> graphex_common::Result<()> {
    let me = ctx.task_index();
    let keys: Vec<i64> = ctx
        .nodes()
        .iter()
        .filter_map(|n| representative_key(&n.partition_plan))
        .collect();
    if keys.len() != ctx.node_count() {
        return Err(graphex_common::GraphexError::InvalidConfig(
            "every node needs a non-empty partition plan".to_string(),
        ));
    }
    let own_key = keys.get(me).copied().unwrap_or_default();
    let records = (0..count)
        .map(|i| {
            let key = keys[i % keys.len()];
            RawRecord::from_fields([FieldObject::Edge(Arc::new(EdgeField::new(
                format!("e{me}-{i}"),
                "knows",
                (format!("v{me}"), own_key.to_string()),
                (format!("v{key}-{i}"), key.to_string()),
            )))])
        })
        .collect();

    let router = PartitionRouter::edge_endpoint(ctx.nodes().clone(), 0, TraversalDirection::Sink);
    let mut receive = exchange(
        &ctx,
        Box::new(VecSource::new(records)),
        SendPolicy::Send { bound: 0, router },
    )?;
    let mut coordinator = AggregationCoordinator::new(Arc::clone(&ctx), AggregateTargetPolicy::default())?;

    let local = drain(&mut receive)?;
    info!(task = me, records = local.len(), "exchange finished");

    let mut states = vec![AggregateState::count()];
    for record in &local {
        for field in record.fields.iter().flatten() {
            states[0].accumulate(field)?;
        }
    }
    if coordinator.aggregate(&mut states)? {
        info!(task = me, total = ?states[0].result(), "global record count");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let task_index = env_usize_or_default("GRAPHEX_TASK_INDEX", 0);
    let nodes_path = env_or_default("GRAPHEX_NODES_PATH", "/etc/graphex/nodes.json");
    let query_id = env_or_default("GRAPHEX_QUERY_ID", "graphex-demo");
    let demo_records = env_usize_or_default("GRAPHEX_DEMO_RECORDS", 9);

    let nodes = NodeTable::from_json(&std::fs::read_to_string(&nodes_path)?)?;
    let exchange_config = ExchangeConfig::from_env()?;
    let own = nodes.get(task_index).ok_or_else(|| {
        format!("task index {task_index} outside node table of {} nodes", nodes.len())
    })?;
    let bind_addr: SocketAddr = env_or_default("GRAPHEX_BIND", &own.address).parse()?;

    #[cfg(feature = "profiling")]
    if let Some(endpoint) = graphex_common::MetricsEndpoint::from_env()? {
        info!(task = task_index, addr = %endpoint.addr(), "serving exchange metrics");
        tokio::spawn(async move {
            if let Err(err) = endpoint.serve().await {
                tracing::warn!(error = %err, "metrics endpoint stopped");
            }
        });
    }

    let registry = Arc::new(InboundRegistry::new(task_index));
    let server = tokio::spawn(
        Server::builder()
            .add_service(ExchangeServiceImpl::new(Arc::clone(&registry)).into_server(&exchange_config))
            .serve(bind_addr),
    );
    info!(task = task_index, %bind_addr, nodes = nodes.len(), "graphex-worker serving exchange");

    // Exchange operators block, so the demo runs off the async runtime.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    thread::spawn(move || {
        let result = GrpcTransport::new(&nodes, &exchange_config).and_then(|transport| {
            let ctx = WorkerContext::new(
                WorkerConfig {
                    task_index,
                    query_id: QueryId(query_id),
                    exchange: exchange_config,
                },
                nodes,
                Arc::new(transport),
                registry,
                Arc::new(InMemoryVertexCache::new()),
            )?;
            run_demo(ctx, demo_records)
        });
        let _ = done_tx.send(result);
    });

    let outcome = done_rx.await?;
    server.abort();
    outcome?;
    Ok(())
}
