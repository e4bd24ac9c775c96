use std::sync::Arc;
use std::thread;

use graphex_common::{ExchangeConfig, QueryId};
use graphex_distributed::{
    exchange, in_process_cluster, AggregateState, AggregateTargetPolicy, AggregationCoordinator,
    NodePlan, NodeTable, PartitionPlan, PartitionRouter, SendPolicy, TraversalDirection,
};
use graphex_execution::{drain, VecSource};
use graphex_record::{EdgeField, FieldObject, RawRecord, ScalarValue, VertexField};

fn three_nodes() -> NodeTable {
    NodeTable::from_json(
        r#"[
            {"task_index": 0, "address": "127.0.0.1:7100", "partition_plan": {"type": "range", "start": 0, "end": 1}},
            {"task_index": 1, "address": "127.0.0.1:7101", "partition_plan": {"type": "values", "values": [1]}},
            {"task_index": 2, "address": "127.0.0.1:7102", "partition_plan": {"type": "range", "start": 2, "end": 3}}
        ]"#,
    )
    .expect("node table")
}

/// Worker `me` emits one edge per key in `[0, 1, 2]`, each carrying the
/// same shared destination vertex.
fn worker_input(me: usize) -> Vec<RawRecord> {
    (0..3)
        .map(|key: i64| {
            let edge = EdgeField::new(
                format!("e{me}-{key}"),
                "knows",
                (format!("v{me}"), me.to_string()),
                (format!("v{key}"), key.to_string()),
            );
            let dst = VertexField::new(format!("v{key}"), "person", key.to_string())
                .with_property("name", "p0", format!("vertex-{key}"));
            RawRecord::from_fields([
                FieldObject::Edge(Arc::new(edge)),
                FieldObject::Vertex(Arc::new(dst)),
            ])
        })
        .collect()
}

#[test]
fn nine_records_split_three_ways_from_one_worker() {
    let contexts = in_process_cluster(
        three_nodes(),
        QueryId("nine-records".to_string()),
        ExchangeConfig::default(),
    )
    .expect("cluster");

    let outcomes: Vec<(Vec<RawRecord>, Vec<u64>)> = thread::scope(|s| {
        let handles: Vec<_> = contexts
            .iter()
            .map(|ctx| {
                s.spawn(move || {
                    let me = ctx.task_index();
                    let input = if me == 0 {
                        (0..9)
                            .map(|i: i64| {
                                let key = i % 3;
                                RawRecord::from_fields([FieldObject::Edge(Arc::new(EdgeField::new(
                                    format!("e{i}"),
                                    "knows",
                                    ("v0".to_string(), "0".to_string()),
                                    (format!("v{key}"), key.to_string()),
                                )))])
                            })
                            .collect()
                    } else {
                        Vec::new()
                    };
                    let router =
                        PartitionRouter::edge_endpoint(ctx.nodes().clone(), 0, TraversalDirection::Sink);
                    let mut receive = exchange(
                        ctx,
                        Box::new(VecSource::new(input)),
                        SendPolicy::Send { bound: 0, router },
                    )
                    .expect("exchange");
                    let records = drain(&mut receive).expect("drain");
                    (records, receive.send().sent_to().to_vec())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread"))
            .collect()
    });

    assert_eq!(outcomes[0].1, vec![0, 3, 3]);
    assert_eq!(outcomes[1].1, vec![0, 0, 0]);
    assert_eq!(outcomes[2].1, vec![0, 0, 0]);
    for (me, (records, _)) in outcomes.iter().enumerate() {
        let mut ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.get(0).and_then(FieldObject::as_edge).map(|e| e.id.clone()))
            .collect();
        ids.sort();
        let expected: Vec<String> = (0..9).filter(|i| i % 3 == me).map(|i| format!("e{i}")).collect();
        assert_eq!(ids, expected, "worker {me}");
    }
}

#[test]
fn three_workers_partition_by_sink_vertex() {
    let nodes = three_nodes();
    let contexts = in_process_cluster(
        nodes.clone(),
        QueryId("three-worker".to_string()),
        ExchangeConfig::default(),
    )
    .expect("cluster");

    let outcomes: Vec<(Vec<RawRecord>, Option<FieldObject>)> = thread::scope(|s| {
        let handles: Vec<_> = contexts
            .iter()
            .map(|ctx| {
                s.spawn(move || {
                    let me = ctx.task_index();
                    let router =
                        PartitionRouter::edge_endpoint(ctx.nodes().clone(), 0, TraversalDirection::Sink);
                    let mut receive = exchange(
                        ctx,
                        Box::new(VecSource::new(worker_input(me))),
                        SendPolicy::Send { bound: 0, router },
                    )
                    .expect("exchange");
                    let mut coordinator =
                        AggregationCoordinator::new(Arc::clone(ctx), AggregateTargetPolicy::default())
                            .expect("coordinator");

                    let records = drain(&mut receive).expect("drain");
                    let mut states = vec![AggregateState::count()];
                    for record in &records {
                        if let Some(edge) = record.get(0) {
                            states[0].accumulate(edge).expect("count");
                        }
                    }
                    let global = coordinator
                        .aggregate(&mut states)
                        .expect("aggregate")
                        .then(|| states[0].result());
                    (records, global)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread"))
            .collect()
    });

    for (me, (records, global)) in outcomes.iter().enumerate() {
        assert_eq!(records.len(), 3, "worker {me} owns one edge from every worker");
        for record in records {
            let edge = record.get(0).and_then(FieldObject::as_edge).expect("edge slot");
            assert_eq!(edge.in_v_partition, me.to_string());
            let vertex = record.get(1).and_then(FieldObject::as_vertex).expect("vertex slot");
            assert_eq!(vertex.id, format!("v{me}"));
            assert_eq!(
                vertex
                    .single_property("name", "p0")
                    .map(|p| p.value.clone()),
                Some(ScalarValue::from(format!("vertex-{me}")))
            );
        }
        if me == 0 {
            assert_eq!(global.as_ref(), Some(&FieldObject::scalar(9)));
        } else {
            assert!(global.is_none());
        }
    }
}
