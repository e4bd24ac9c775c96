use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use graphex_common::{ExchangeConfig, GraphexError, QueryId};
use graphex_execution::{drain, BoundedBuffer, BufferSource, DrainMode, RecordOperator, VecSource};
use graphex_record::{EdgeField, FieldObject, RawRecord, ScalarValue};

use graphex_codec::encode_record;

use crate::aggregate::{AggregateState, AggregateTargetPolicy, AggregationCoordinator};
use crate::messenger::{Envelope, MessageKind};
use crate::partition::{NodePlan, NodeTable, PartitionPlan, PartitionRouter, TraversalDirection};
use crate::receive::{exchange, exchange_with};
use crate::send::SendPolicy;
use crate::worker::{in_process_cluster, WorkerContext};

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

fn cluster(n: usize) -> Vec<Arc<WorkerContext>> {
    in_process_cluster(
        table(n),
        QueryId("exchange-test".to_string()),
        ExchangeConfig {
            send_retry_interval_ms: 1,
            ..ExchangeConfig::default()
        },
    )
    .expect("cluster")
}

/// One-slot record whose edge sinks into partition `key`.
fn edge_record(id: String, key: i64) -> RawRecord {
    RawRecord::from_fields([edge(id, key)])
}

fn edge(id: String, key: i64) -> FieldObject {
    FieldObject::Edge(Arc::new(EdgeField::new(
        id.clone(),
        "knows",
        (format!("src-{id}"), "0"),
        (format!("dst-{id}"), key.to_string()),
    )))
}

fn sink_router(ctx: &WorkerContext) -> PartitionRouter {
    PartitionRouter::edge_endpoint(ctx.nodes().clone(), 0, TraversalDirection::Sink)
}

/// Runs `f` once per worker, each on its own thread.
fn run_workers<T, F>(contexts: &[Arc<WorkerContext>], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Arc<WorkerContext>) -> T + Sync,
{
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = contexts.iter().map(|ctx| s.spawn(move || f(ctx))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread"))
            .collect()
    })
}

fn edge_ids(records: &[RawRecord]) -> Vec<String> {
    let mut ids: Vec<String> = records
        .iter()
        .filter_map(|r| r.get(0).and_then(FieldObject::as_edge).map(|e| e.id.clone()))
        .collect();
    ids.sort();
    ids
}

#[test]
fn receive_waits_for_every_peer_signal() {
    let contexts = cluster(2);
    let finished = AtomicBool::new(false);
    let received = thread::scope(|s| {
        let waiter = s.spawn(|| {
            let ctx = &contexts[0];
            let mut receive = exchange(
                ctx,
                Box::new(VecSource::new(Vec::new())),
                SendPolicy::Send {
                    bound: 0,
                    router: sink_router(ctx),
                },
            )
            .expect("exchange");
            let records = drain(&mut receive).expect("drain");
            finished.store(true, Ordering::SeqCst);
            records
        });

        thread::sleep(Duration::from_millis(50));
        assert!(
            !finished.load(Ordering::SeqCst),
            "worker 0 passed the barrier before worker 1 signaled"
        );

        let ctx = &contexts[1];
        let mut receive = exchange(
            ctx,
            Box::new(VecSource::new(vec![
                edge_record("a".to_string(), 0),
                edge_record("b".to_string(), 0),
            ])),
            SendPolicy::Send {
                bound: 0,
                router: sink_router(ctx),
            },
        )
        .expect("exchange");
        assert!(drain(&mut receive).expect("drain").is_empty());
        waiter.join().expect("waiter")
    });
    assert_eq!(edge_ids(&received), vec!["a", "b"]);
}

#[test]
fn signal_ahead_of_its_data_holds_the_barrier() {
    let contexts = cluster(2);
    // Worker 1's generator yields the id worker 0's exchange opens.
    let channel = contexts[1].next_channel_id();
    let finished = AtomicBool::new(false);
    let received = thread::scope(|s| {
        let waiter = s.spawn(|| {
            let ctx = &contexts[0];
            let mut receive = exchange(
                ctx,
                Box::new(VecSource::new(Vec::new())),
                SendPolicy::Send {
                    bound: 0,
                    router: sink_router(ctx),
                },
            )
            .expect("exchange");
            assert_eq!(receive.channel_id(), &channel);
            let records = drain(&mut receive).expect("drain");
            finished.store(true, Ordering::SeqCst);
            records
        });

        let inbound = contexts[0].inbound();
        inbound.deliver(Envelope {
            channel: channel.clone(),
            round: 0,
            kind: MessageKind::Signal,
            payload: "1,0,1".to_string(),
            source: Some(1),
        });
        thread::sleep(Duration::from_millis(100));
        assert!(
            !finished.load(Ordering::SeqCst),
            "worker 0 passed the barrier before the announced record arrived"
        );

        inbound.deliver(Envelope {
            channel: channel.clone(),
            round: 0,
            kind: MessageKind::Data,
            payload: encode_record(&edge_record("late".to_string(), 0)).expect("encode"),
            source: Some(1),
        });
        waiter.join().expect("waiter")
    });
    assert_eq!(edge_ids(&received), vec!["late"]);
}

#[test]
fn bound_keeps_leading_records_local() {
    let contexts = cluster(2);
    let results = run_workers(&contexts, |ctx| {
        let input = if ctx.task_index() == 0 {
            (0..4).map(|i| edge_record(format!("r{i}"), 1)).collect()
        } else {
            Vec::new()
        };
        let mut receive = exchange(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::Send {
                bound: 2,
                router: sink_router(ctx),
            },
        )
        .expect("exchange");
        drain(&mut receive).expect("drain")
    });
    assert_eq!(edge_ids(&results[0]), vec!["r0", "r1"]);
    assert_eq!(edge_ids(&results[1]), vec!["r2", "r3"]);
}

#[test]
fn unowned_partition_keys_are_routing_errors() {
    let contexts = cluster(1);
    let ctx = &contexts[0];
    let mut receive = exchange(
        ctx,
        Box::new(VecSource::new(vec![edge_record("lost".to_string(), 42)])),
        SendPolicy::Send {
            bound: 0,
            router: sink_router(ctx),
        },
    )
    .expect("exchange");
    let err = drain(&mut receive).expect_err("key 42 has no owner");
    assert!(matches!(err, GraphexError::Routing(_)));
}

#[test]
fn attached_origins_route_records_back_home() {
    let contexts = cluster(2);
    let results = run_workers(&contexts, |ctx| {
        let me = ctx.task_index();
        let away = 1 - me as i64;
        let count = if me == 0 { 2 } else { 1 };
        let input = (0..count)
            .map(|i| {
                RawRecord::new(vec![
                    Some(edge(format!("w{me}-{i}"), away)),
                    Some(FieldObject::Scalar(ScalarValue::Int(crate::send::UNSET_TASK))),
                ])
            })
            .collect();
        let outbound = exchange(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::SendAndAttachTaskId {
                bound: 0,
                router: sink_router(ctx),
                origin_slot: 1,
            },
        )
        .expect("outbound");
        let mut back = exchange(ctx, Box::new(outbound), SendPolicy::SendBack { origin_slot: 1 })
            .expect("back");
        drain(&mut back).expect("drain")
    });

    assert_eq!(edge_ids(&results[0]), vec!["w0-0", "w0-1"]);
    assert_eq!(edge_ids(&results[1]), vec!["w1-0"]);
    for (worker, records) in results.iter().enumerate() {
        for record in records {
            assert_eq!(
                record.get(1).and_then(FieldObject::as_scalar),
                Some(&ScalarValue::Int(worker as i64))
            );
        }
    }
}

#[test]
fn send_back_reports_pending_input_to_peers() {
    let contexts = cluster(2);
    let flags = run_workers(&contexts, |ctx| {
        let buffer = Arc::new(BoundedBuffer::new(4));
        if ctx.task_index() == 0 {
            buffer.add(RawRecord::with_arity(1)).expect("add");
        } else {
            buffer.close();
        }
        let mut receive = exchange(
            ctx,
            Box::new(BufferSource::new(buffer, DrainMode::Available)),
            SendPolicy::SendBack { origin_slot: 0 },
        )
        .expect("exchange");
        let records = drain(&mut receive).expect("drain");
        (records.len(), receive.other_container_has_more_result())
    });
    assert_eq!(flags[0], (1, false));
    assert_eq!(flags[1], (0, true));
}

#[test]
fn unfetched_remote_data_still_counts_toward_the_barrier() {
    let contexts = cluster(2);
    let results = run_workers(&contexts, |ctx| {
        let me = ctx.task_index();
        let input = if me == 0 {
            vec![edge_record("x".to_string(), 1), edge_record("y".to_string(), 1)]
        } else {
            vec![edge_record("z".to_string(), 1)]
        };
        let mut receive = exchange_with(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::Send {
                bound: 0,
                router: sink_router(ctx),
            },
            false,
        )
        .expect("exchange");
        let records = drain(&mut receive).expect("drain");
        (edge_ids(&records), receive.has_global_result())
    });
    assert_eq!(results[0], (Vec::<String>::new(), true));
    assert_eq!(results[1], (vec!["z".to_string()], true));
}

#[test]
fn aggregate_policy_funnels_everything_to_the_target() {
    let contexts = cluster(3);
    let results = run_workers(&contexts, |ctx| {
        let me = ctx.task_index();
        let input = (0..2).map(|i| edge_record(format!("w{me}-{i}"), me as i64)).collect();
        let mut receive = exchange(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::Aggregate {
                target: 0,
                max_count: None,
            },
        )
        .expect("exchange");
        drain(&mut receive).expect("drain").len()
    });
    assert_eq!(results, vec![6, 0, 0]);
}

#[test]
fn aggregate_max_count_limits_each_worker_input() {
    let contexts = cluster(3);
    let results = run_workers(&contexts, |ctx| {
        let me = ctx.task_index();
        let input = (0..5).map(|i| edge_record(format!("w{me}-{i}"), 0)).collect();
        let mut receive = exchange(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::Aggregate {
                target: 0,
                max_count: Some(1),
            },
        )
        .expect("exchange");
        drain(&mut receive).expect("drain").len()
    });
    assert_eq!(results, vec![3, 0, 0]);
}

#[test]
fn side_effect_copies_do_not_return() {
    let contexts = cluster(3);
    let results = run_workers(&contexts, |ctx| {
        let me = ctx.task_index();
        let input = (0..2).map(|i| edge_record(format!("w{me}-{i}"), 0)).collect();
        let mut receive = exchange(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::AggregateSideEffect { target: 0 },
        )
        .expect("exchange");
        drain(&mut receive).expect("drain")
    });

    let returned = |records: &[RawRecord]| records.iter().filter(|r| r.need_return).count();
    assert_eq!(results[0].len(), 6);
    assert_eq!(returned(&results[0]), 2);
    assert_eq!(results[1].len(), 2);
    assert_eq!(returned(&results[1]), 2);
    assert_eq!(returned(&results[2]), 2);
}

#[test]
fn reset_state_runs_another_round_on_the_same_channel() {
    let contexts = cluster(2);
    let rounds = run_workers(&contexts, |ctx| {
        let me = ctx.task_index();
        let input = (0..3).map(|i| edge_record(format!("w{me}-{i}"), i % 2)).collect();
        let mut receive = exchange(
            ctx,
            Box::new(VecSource::new(input)),
            SendPolicy::Send {
                bound: 0,
                router: sink_router(ctx),
            },
        )
        .expect("exchange");
        let first = edge_ids(&drain(&mut receive).expect("round 0"));
        assert!(!receive.is_open());
        receive.reset_state().expect("reset");
        let second = edge_ids(&drain(&mut receive).expect("round 1"));
        (first, second)
    });
    for (first, second) in &rounds {
        assert_eq!(first, second);
    }
    assert_eq!(rounds[0].0, vec!["w0-0", "w0-2", "w1-0", "w1-2"]);
    assert_eq!(rounds[1].0, vec!["w0-1", "w1-1"]);
}

#[test]
fn coordinator_merges_partials_on_the_target() {
    let contexts = cluster(3);
    let results = run_workers(&contexts, |ctx| {
        let me = ctx.task_index() as i64;
        let mut coordinator =
            AggregationCoordinator::new(Arc::clone(ctx), AggregateTargetPolicy::default())
                .expect("coordinator");
        let mut states = vec![AggregateState::count(), AggregateState::sum(), AggregateState::max()];
        for value in 0..=me {
            let value = FieldObject::scalar(value * 10);
            for state in &mut states {
                state.accumulate(&value).expect("accumulate");
            }
        }
        let is_global = coordinator.aggregate(&mut states).expect("aggregate");
        (is_global, states.iter().map(AggregateState::result).collect::<Vec<_>>())
    });

    let (is_global, totals) = &results[0];
    assert!(is_global);
    assert_eq!(
        totals,
        &vec![
            FieldObject::scalar(6),
            FieldObject::scalar(40),
            FieldObject::scalar(20)
        ]
    );
    assert!(!results[1].0);
    assert!(!results[2].0);
}

#[test]
fn empty_partial_lists_are_already_global() {
    let contexts = cluster(2);
    let mut coordinator =
        AggregationCoordinator::new(Arc::clone(&contexts[1]), AggregateTargetPolicy::Fixed(0))
            .expect("coordinator");
    assert!(coordinator.aggregate(&mut []).expect("empty"));
    assert!(AggregationCoordinator::new(Arc::clone(&contexts[0]), AggregateTargetPolicy::Fixed(7)).is_err());
}
