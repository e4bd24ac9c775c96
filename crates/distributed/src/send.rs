//! Send half of an exchange.
//!
//! The Send operator sits between a local upstream and its paired Receive
//! operator. Records it keeps are returned from `next`; records owned by
//! another worker are encoded and forwarded. Once upstream is exhausted it
//! tells every other worker how much it produced.
//!
//! Completion signal payload: `"{sender},{result_count},{data_sent_to_target}"`,
//! plus `",{more_input}"` for [`SendPolicy::SendBack`]. The per-target data
//! count lets the receiver wait for in-flight data regardless of delivery
//! order.

use std::sync::Arc;

use graphex_codec::encode_record;
use graphex_common::metrics::global_metrics;
use graphex_common::{ChannelId, GraphexError, Result};
use graphex_execution::{BoxedOperator, RecordOperator};
use graphex_record::{FieldObject, RawRecord, ScalarValue};
use tracing::{debug, info};

use crate::partition::PartitionRouter;
use crate::worker::WorkerContext;

/// Origin-task slot value meaning "not stamped yet".
pub const UNSET_TASK: i64 = -1;

#[derive(Debug, Clone)]
pub enum SendPolicy {
    /// Pass everything through.
    Sync,
    /// Pass the first `bound` records through, then route by partition.
    Send {
        bound: usize,
        router: PartitionRouter,
    },
    /// Like `Send`, stamping unset origin slots with the local task index.
    SendAndAttachTaskId {
        bound: usize,
        router: PartitionRouter,
        origin_slot: usize,
    },
    /// Return records to the worker named in their origin slot.
    SendBack { origin_slot: usize },
    /// Funnel every record to `target`, optionally stopping after `max_count`.
    Aggregate {
        target: usize,
        max_count: Option<usize>,
    },
    /// Keep every record and also forward a side-effect copy to `target`.
    AggregateSideEffect { target: usize },
}

impl SendPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Send { .. } => "send",
            Self::SendAndAttachTaskId { .. } => "send_and_attach_task_id",
            Self::SendBack { .. } => "send_back",
            Self::Aggregate { .. } => "aggregate",
            Self::AggregateSideEffect { .. } => "aggregate_side_effect",
        }
    }

    /// Worker that never signals the paired receivers for this policy.
    pub fn aggregate_target(&self) -> Option<usize> {
        match self {
            Self::Aggregate { target, .. } | Self::AggregateSideEffect { target } => Some(*target),
            _ => None,
        }
    }
}

/// Parsed completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSignal {
    pub sender: usize,
    pub result_count: u64,
    /// Data messages the sender addressed to the receiving worker.
    pub data_sent: u64,
    pub more_input: Option<bool>,
}

impl CompletionSignal {
    pub fn encode(&self) -> String {
        match self.more_input {
            Some(more) => format!(
                "{},{},{},{more}",
                self.sender, self.result_count, self.data_sent
            ),
            None => format!("{},{},{}", self.sender, self.result_count, self.data_sent),
        }
    }

    pub fn parse(payload: &str) -> Result<Self> {
        let malformed = || GraphexError::Codec(format!("malformed completion signal {payload:?}"));
        let parts: Vec<&str> = payload.split(',').map(str::trim).collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(malformed());
        }
        Ok(Self {
            sender: parts[0].parse().map_err(|_| malformed())?,
            result_count: parts[1].parse().map_err(|_| malformed())?,
            data_sent: parts[2].parse().map_err(|_| malformed())?,
            more_input: match parts.get(3) {
                Some(flag) => Some(flag.parse().map_err(|_| malformed())?),
                None => None,
            },
        })
    }
}

pub struct SendOperator {
    input: BoxedOperator,
    policy: SendPolicy,
    ctx: Arc<WorkerContext>,
    channel: ChannelId,
    round: u64,
    result_count: u64,
    processed: usize,
    sent_to: Vec<u64>,
    open: bool,
}

impl SendOperator {
    pub fn new(
        ctx: Arc<WorkerContext>,
        input: BoxedOperator,
        policy: SendPolicy,
        channel: ChannelId,
    ) -> Result<Self> {
        let nodes = ctx.node_count();
        let target_ok = |target: usize| {
            if target < nodes {
                Ok(())
            } else {
                Err(GraphexError::InvalidConfig(format!(
                    "aggregate target {target} outside node table of {nodes} nodes"
                )))
            }
        };
        if let Some(target) = policy.aggregate_target() {
            target_ok(target)?;
        }
        Ok(Self {
            input,
            policy,
            ctx,
            channel,
            round: 0,
            result_count: 0,
            processed: 0,
            sent_to: vec![0; nodes],
            open: true,
        })
    }

    pub fn policy(&self) -> &SendPolicy {
        &self.policy
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn result_count(&self) -> u64 {
        self.result_count
    }

    /// Records forwarded to each worker this round, indexed by task.
    pub fn sent_to(&self) -> &[u64] {
        &self.sent_to
    }

    fn emit(&mut self, record: RawRecord) -> Option<RawRecord> {
        self.result_count += 1;
        global_metrics().record_routed(self.ctx.task_index(), "local");
        Some(record)
    }

    fn forward(&mut self, target: usize, record: &RawRecord) -> Result<()> {
        let payload = encode_record(record)?;
        self.ctx
            .messenger()
            .send_data_with_source(&self.channel, self.round, payload, target)?;
        self.sent_to[target] += 1;
        global_metrics().record_routed(self.ctx.task_index(), "remote");
        debug!(
            task = self.ctx.task_index(),
            channel = %self.channel,
            peer = target,
            policy = self.policy.name(),
            "forwarded record"
        );
        Ok(())
    }

    /// Handles one upstream record; `Some` means emit it locally.
    fn dispatch(&mut self, mut record: RawRecord) -> Result<Option<RawRecord>> {
        let me = self.ctx.task_index();
        match self.policy.clone() {
            SendPolicy::Sync => Ok(self.emit(record)),
            SendPolicy::Send { bound, router } => self.route(record, bound, &router),
            SendPolicy::SendAndAttachTaskId {
                bound,
                router,
                origin_slot,
            } => {
                if read_origin(&record, origin_slot, self.ctx.node_count())?.is_none() {
                    record.set(origin_slot, FieldObject::Scalar(ScalarValue::Int(me as i64)))?;
                }
                self.route(record, bound, &router)
            }
            SendPolicy::SendBack { origin_slot } => {
                match read_origin(&record, origin_slot, self.ctx.node_count())? {
                    Some(origin) if origin != me => {
                        self.forward(origin, &record)?;
                        Ok(None)
                    }
                    _ => Ok(self.emit(record)),
                }
            }
            SendPolicy::Aggregate { target, .. } => {
                if target == me {
                    Ok(self.emit(record))
                } else {
                    self.result_count += 1;
                    self.forward(target, &record)?;
                    Ok(None)
                }
            }
            SendPolicy::AggregateSideEffect { target } => {
                if target != me {
                    let mut copy = record.clone();
                    copy.need_return = false;
                    self.forward(target, &copy)?;
                }
                record.need_return = true;
                Ok(self.emit(record))
            }
        }
    }

    fn route(
        &mut self,
        record: RawRecord,
        bound: usize,
        router: &PartitionRouter,
    ) -> Result<Option<RawRecord>> {
        if self.processed <= bound {
            return Ok(self.emit(record));
        }
        let owner = router.route(&record)?;
        if owner == self.ctx.task_index() {
            Ok(self.emit(record))
        } else {
            self.forward(owner, &record)?;
            Ok(None)
        }
    }

    fn input_limit_reached(&self) -> bool {
        matches!(
            self.policy,
            SendPolicy::Aggregate { max_count: Some(max), .. } if self.processed >= max
        )
    }

    /// Broadcasts the completion signal and closes the operator.
    fn finish(&mut self) -> Result<()> {
        let me = self.ctx.task_index();
        let more_input = match self.policy {
            SendPolicy::SendBack { .. } => Some(self.input.has_pending_input()),
            _ => None,
        };
        for target in (0..self.ctx.node_count()).filter(|t| *t != me) {
            let signal = CompletionSignal {
                sender: me,
                result_count: self.result_count,
                data_sent: self.sent_to[target],
                more_input,
            };
            self.ctx.messenger().send_signal_with_source(
                &self.channel,
                self.round,
                signal.encode(),
                target,
            )?;
        }
        self.open = false;
        info!(
            task = me,
            channel = %self.channel,
            round = self.round,
            policy = self.policy.name(),
            result_count = self.result_count,
            forwarded = self.sent_to.iter().sum::<u64>(),
            "send operator finished"
        );
        Ok(())
    }
}

/// Reads the origin-task slot; `None` when unset.
fn read_origin(record: &RawRecord, slot: usize, nodes: usize) -> Result<Option<usize>> {
    let value = match record.get(slot) {
        None => return Ok(None),
        Some(FieldObject::Scalar(value)) => value,
        Some(other) => {
            return Err(GraphexError::Execution(format!(
                "origin slot {slot} holds a {}",
                other.kind_name()
            )))
        }
    };
    if value.is_null() {
        return Ok(None);
    }
    let task = value.as_i64().ok_or_else(|| {
        GraphexError::Execution(format!("origin slot {slot} holds non-integer {value}"))
    })?;
    if task == UNSET_TASK {
        return Ok(None);
    }
    usize::try_from(task)
        .ok()
        .filter(|t| *t < nodes)
        .map(Some)
        .ok_or_else(|| GraphexError::Execution(format!("origin task {task} is not a worker index")))
}

impl RecordOperator for SendOperator {
    fn name(&self) -> &'static str {
        "SendOperator"
    }

    fn next(&mut self) -> Result<Option<RawRecord>> {
        if !self.open {
            return Ok(None);
        }
        while !self.input_limit_reached() {
            let Some(record) = self.input.next()? else {
                break;
            };
            self.processed += 1;
            if let Some(record) = self.dispatch(record)? {
                return Ok(Some(record));
            }
        }
        self.finish()?;
        Ok(None)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset_state(&mut self) -> Result<()> {
        self.input.reset_state()?;
        self.round += 1;
        self.result_count = 0;
        self.processed = 0;
        self.sent_to.iter_mut().for_each(|count| *count = 0);
        self.open = true;
        Ok(())
    }

    fn has_pending_input(&self) -> bool {
        self.input.has_pending_input()
    }
}
