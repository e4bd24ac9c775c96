//! Per-channel inbound queues.
//!
//! Responsibilities:
//! - buffer data messages and control signals per channel id until the local
//!   Receive side drains them;
//! - create channels on first touch so messages that arrive before the local
//!   operator exists are kept;
//! - drop late messages for channels that were already torn down.
//!
//! Round handling:
//! - every message carries the round of the Send/Receive pair that produced it;
//! - draining for round `r` keeps messages of later rounds buffered and drops
//!   messages of earlier rounds.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use graphex_common::metrics::global_metrics;
use graphex_common::ChannelId;
use tracing::{debug, warn};

use crate::messenger::{Envelope, MessageKind};

/// Torn-down channel ids remembered to recognise late messages.
const CLOSED_CHANNEL_MEMORY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub round: u64,
    pub payload: String,
    pub source: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Data(InboundMessage),
    /// Every signal buffered for the round, in arrival order.
    Signals(Vec<InboundMessage>),
}

#[derive(Debug, Default)]
struct ChannelState {
    data: VecDeque<InboundMessage>,
    signals: VecDeque<InboundMessage>,
}

/// Listener queue of one Send/Receive pair on one worker.
#[derive(Debug)]
pub struct InboundChannel {
    id: ChannelId,
    task_index: usize,
    state: Mutex<ChannelState>,
    cv: Condvar,
}

impl InboundChannel {
    fn new(id: ChannelId, task_index: usize) -> Self {
        Self {
            id,
            task_index,
            state: Mutex::new(ChannelState::default()),
            cv: Condvar::new(),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().expect("inbound channel lock poisoned")
    }

    fn push(&self, kind: MessageKind, message: InboundMessage) {
        let mut state = self.lock();
        match kind {
            MessageKind::Data => state.data.push_back(message),
            MessageKind::Signal => state.signals.push_back(message),
        }
        self.cv.notify_all();
    }

    /// Blocks until a data message or a signal for `round` is buffered.
    ///
    /// Data is preferred; signals are returned all at once.
    pub fn recv(&self, round: u64) -> InboundEvent {
        let mut state = self.lock();
        loop {
            if let Some(event) = self.take_event(&mut state, round) {
                return event;
            }
            state = self.cv.wait(state).expect("inbound channel lock poisoned");
        }
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&self, round: u64) -> Option<InboundEvent> {
        let mut state = self.lock();
        self.take_event(&mut state, round)
    }

    fn take_event(&self, state: &mut ChannelState, round: u64) -> Option<InboundEvent> {
        self.discard_stale(&mut state.data, round, "data");
        self.discard_stale(&mut state.signals, round, "signal");

        if let Some(position) = state.data.iter().position(|m| m.round == round) {
            return state.data.remove(position).map(InboundEvent::Data);
        }
        let mut signals = Vec::new();
        let mut keep = VecDeque::with_capacity(state.signals.len());
        for message in state.signals.drain(..) {
            if message.round == round {
                signals.push(message);
            } else {
                keep.push_back(message);
            }
        }
        state.signals = keep;
        if signals.is_empty() {
            None
        } else {
            Some(InboundEvent::Signals(signals))
        }
    }

    fn discard_stale(&self, queue: &mut VecDeque<InboundMessage>, round: u64, kind: &str) {
        let before = queue.len();
        queue.retain(|m| m.round >= round);
        let dropped = before - queue.len();
        if dropped > 0 {
            warn!(
                task = self.task_index,
                channel = %self.id,
                round,
                dropped,
                kind,
                "dropping messages from a finished round"
            );
        }
    }

    /// Blocks until a data message of `round` from every index in `sources`
    /// has arrived and returns them in arrival order.
    ///
    /// Data without a source, or from an index outside `sources`, is dropped.
    pub fn wait_for_sources(&self, round: u64, sources: &BTreeSet<usize>) -> Vec<InboundMessage> {
        let mut collected: Vec<InboundMessage> = Vec::with_capacity(sources.len());
        let mut seen = BTreeSet::new();
        let mut state = self.lock();
        loop {
            self.discard_stale(&mut state.data, round, "data");
            let mut keep = VecDeque::with_capacity(state.data.len());
            for message in state.data.drain(..) {
                if message.round != round {
                    keep.push_back(message);
                    continue;
                }
                match message.source {
                    Some(source) if sources.contains(&source) && seen.insert(source) => {
                        collected.push(message)
                    }
                    other => warn!(
                        task = self.task_index,
                        channel = %self.id,
                        source = ?other,
                        "dropping unexpected aggregate message"
                    ),
                }
            }
            state.data = keep;
            if seen.len() == sources.len() {
                return collected;
            }
            state = self.cv.wait(state).expect("inbound channel lock poisoned");
        }
    }

    pub fn pending(&self) -> (usize, usize) {
        let state = self.lock();
        (state.data.len(), state.signals.len())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    channels: HashMap<ChannelId, Arc<InboundChannel>>,
    closed: HashSet<ChannelId>,
    closed_order: VecDeque<ChannelId>,
}

/// All inbound channels of one worker, addressed by channel id.
#[derive(Debug)]
pub struct InboundRegistry {
    task_index: usize,
    state: Mutex<RegistryState>,
}

impl InboundRegistry {
    pub fn new(task_index: usize) -> Self {
        Self {
            task_index,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("inbound registry lock poisoned")
    }

    /// Returns the channel for `id`, creating it if needed.
    pub fn open(&self, id: &ChannelId) -> Arc<InboundChannel> {
        let mut state = self.lock();
        if state.closed.remove(id) {
            state.closed_order.retain(|closed| closed != id);
        }
        Arc::clone(
            state
                .channels
                .entry(id.clone())
                .or_insert_with(|| Arc::new(InboundChannel::new(id.clone(), self.task_index))),
        )
    }

    /// Queues an envelope on its channel.
    pub fn deliver(&self, envelope: Envelope) {
        let channel = {
            let mut state = self.lock();
            if state.closed.contains(&envelope.channel) {
                warn!(
                    task = self.task_index,
                    channel = %envelope.channel,
                    source = ?envelope.source,
                    kind = envelope.kind.as_str(),
                    "dropping message for a closed channel"
                );
                return;
            }
            let task_index = self.task_index;
            Arc::clone(
                state
                    .channels
                    .entry(envelope.channel.clone())
                    .or_insert_with(|| {
                        Arc::new(InboundChannel::new(envelope.channel.clone(), task_index))
                    }),
            )
        };
        debug!(
            task = self.task_index,
            channel = %envelope.channel,
            source = ?envelope.source,
            round = envelope.round,
            kind = envelope.kind.as_str(),
            "inbound message"
        );
        global_metrics().record_message_received(self.task_index, envelope.kind.as_str());
        channel.push(
            envelope.kind,
            InboundMessage {
                round: envelope.round,
                payload: envelope.payload,
                source: envelope.source,
            },
        );
    }

    /// Tears the channel down; later messages for `id` are dropped.
    pub fn close(&self, id: &ChannelId) {
        let mut state = self.lock();
        state.channels.remove(id);
        if state.closed.insert(id.clone()) {
            state.closed_order.push_back(id.clone());
            while state.closed_order.len() > CLOSED_CHANNEL_MEMORY {
                if let Some(evicted) = state.closed_order.pop_front() {
                    state.closed.remove(&evicted);
                }
            }
        }
    }

    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }
}
