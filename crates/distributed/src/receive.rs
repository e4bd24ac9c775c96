//! Receive half of an exchange and the all-signaled termination barrier.
//!
//! A Receive operator first drains its paired Send operator, then its inbound
//! channel. It closes once every worker that is not pre-marked (itself and the
//! policy's aggregate target) has signaled and all data that worker announced
//! in its signal has arrived.

use std::sync::Arc;

use graphex_codec::decode_record;
use graphex_common::metrics::global_metrics;
use graphex_common::{ChannelId, Result};
use graphex_execution::{BoxedOperator, RecordOperator};
use graphex_record::RawRecord;
use tracing::{debug, info, warn};

use crate::inbound::{InboundChannel, InboundEvent, InboundMessage};
use crate::send::{CompletionSignal, SendOperator, SendPolicy};
use crate::worker::WorkerContext;

#[derive(Debug, Clone, Copy, Default)]
struct SenderState {
    pre_marked: bool,
    signaled: bool,
    expected: u64,
    received: u64,
    result_count: u64,
}

impl SenderState {
    fn done(&self) -> bool {
        self.pre_marked || (self.signaled && self.received >= self.expected)
    }
}

pub struct ReceiveOperator {
    send: SendOperator,
    ctx: Arc<WorkerContext>,
    channel: Arc<InboundChannel>,
    need_fetch_records: bool,
    senders: Vec<SenderState>,
    local_done: bool,
    more_input: bool,
    open: bool,
}

impl ReceiveOperator {
    /// Pairs `send` with a freshly opened inbound channel under the same id.
    pub fn new(ctx: Arc<WorkerContext>, send: SendOperator, need_fetch_records: bool) -> Self {
        let channel = ctx.inbound().open(send.channel());
        let mut op = Self {
            senders: Vec::new(),
            send,
            ctx,
            channel,
            need_fetch_records,
            local_done: false,
            more_input: false,
            open: true,
        };
        op.reset_barrier();
        op
    }

    fn reset_barrier(&mut self) {
        let me = self.ctx.task_index();
        let target = self.send.policy().aggregate_target();
        self.senders = (0..self.ctx.node_count())
            .map(|i| SenderState {
                pre_marked: i == me || Some(i) == target,
                ..SenderState::default()
            })
            .collect();
        self.local_done = false;
        self.more_input = false;
        self.open = true;
    }

    pub fn channel_id(&self) -> &ChannelId {
        self.send.channel()
    }

    /// The paired Send operator.
    pub fn send(&self) -> &SendOperator {
        &self.send
    }

    /// Whether any worker, this one included, produced results this round.
    pub fn has_global_result(&self) -> bool {
        self.send.result_count() > 0 || self.senders.iter().any(|s| s.result_count > 0)
    }

    /// Whether any peer reported input left for another repeat-loop round.
    pub fn other_container_has_more_result(&self) -> bool {
        self.more_input
    }

    fn barrier_met(&self) -> bool {
        self.senders.iter().all(SenderState::done)
    }

    fn on_signal(&mut self, message: &InboundMessage) -> Result<()> {
        let signal = CompletionSignal::parse(&message.payload)?;
        let me = self.ctx.task_index();
        let Some(state) = self.senders.get_mut(signal.sender) else {
            warn!(task = me, channel = %self.channel_id(), sender = signal.sender, "signal from unknown worker");
            return Ok(());
        };
        state.result_count = signal.result_count;
        if state.pre_marked {
            return Ok(());
        }
        state.signaled = true;
        state.expected = signal.data_sent;
        if let Some(more) = signal.more_input {
            self.more_input |= more;
        }
        debug!(
            task = me,
            channel = %self.channel_id(),
            sender = signal.sender,
            result_count = signal.result_count,
            expected = signal.data_sent,
            "completion signal"
        );
        Ok(())
    }

    fn on_data(&mut self, message: InboundMessage) -> Result<Option<RawRecord>> {
        if let Some(state) = message.source.and_then(|s| self.senders.get_mut(s)) {
            state.received += 1;
        }
        if !self.need_fetch_records {
            return Ok(None);
        }
        let record = decode_record(&message.payload, self.ctx.vertex_cache())?;
        global_metrics().record_decoded(self.ctx.task_index());
        Ok(Some(record))
    }
}

impl RecordOperator for ReceiveOperator {
    fn name(&self) -> &'static str {
        "ReceiveOperator"
    }

    fn next(&mut self) -> Result<Option<RawRecord>> {
        if !self.open {
            return Ok(None);
        }
        if !self.local_done {
            if let Some(record) = self.send.next()? {
                return Ok(Some(record));
            }
            self.local_done = true;
        }
        loop {
            if self.barrier_met() {
                self.open = false;
                info!(
                    task = self.ctx.task_index(),
                    channel = %self.channel_id(),
                    round = self.send.round(),
                    global_result = self.has_global_result(),
                    "receive barrier passed"
                );
                return Ok(None);
            }
            match self.channel.recv(self.send.round()) {
                InboundEvent::Data(message) => {
                    if let Some(record) = self.on_data(message)? {
                        return Ok(Some(record));
                    }
                }
                InboundEvent::Signals(signals) => {
                    for signal in &signals {
                        self.on_signal(signal)?;
                    }
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset_state(&mut self) -> Result<()> {
        self.send.reset_state()?;
        self.reset_barrier();
        Ok(())
    }

    fn has_pending_input(&self) -> bool {
        self.send.has_pending_input()
    }
}

impl Drop for ReceiveOperator {
    fn drop(&mut self) {
        self.ctx.inbound().close(self.send.channel());
    }
}

/// Builds a Send/Receive pair over `input` on a newly minted channel.
pub fn exchange(ctx: &Arc<WorkerContext>, input: BoxedOperator, policy: SendPolicy) -> Result<ReceiveOperator> {
    exchange_with(ctx, input, policy, true)
}

/// Like [`exchange`]; with `need_fetch_records = false` remote data only
/// counts toward the barrier and is discarded.
pub fn exchange_with(
    ctx: &Arc<WorkerContext>,
    input: BoxedOperator,
    policy: SendPolicy,
    need_fetch_records: bool,
) -> Result<ReceiveOperator> {
    let channel = ctx.next_channel_id();
    let send = SendOperator::new(Arc::clone(ctx), input, policy, channel)?;
    Ok(ReceiveOperator::new(Arc::clone(ctx), send, need_fetch_records))
}
