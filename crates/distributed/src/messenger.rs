//! Point-to-point messaging between the workers of a query.
//!
//! [`MessageTransport`] performs one delivery attempt; [`Messenger`] layers
//! the blocking retry policy, the message size limit and metrics on top.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use graphex_common::metrics::global_metrics;
use graphex_common::{ChannelId, ExchangeConfig, GraphexError, Result};
use tracing::{error, warn};

use crate::inbound::InboundRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Data,
    Signal,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Signal => "signal",
        }
    }
}

/// One message addressed to a channel on some worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub channel: ChannelId,
    pub round: u64,
    pub kind: MessageKind,
    pub payload: String,
    /// Sender task index for the `*_with_source` operations.
    pub source: Option<usize>,
}

/// A single delivery attempt to worker `target`.
pub trait MessageTransport: Send + Sync + fmt::Debug {
    fn deliver(&self, target: usize, envelope: &Envelope) -> Result<()>;
}

/// Reliable-with-retry sender bound to one worker.
#[derive(Debug, Clone)]
pub struct Messenger {
    task_index: usize,
    transport: Arc<dyn MessageTransport>,
    retry_limit: u32,
    retry_interval: Duration,
    max_message_bytes: usize,
}

impl Messenger {
    pub fn new(task_index: usize, transport: Arc<dyn MessageTransport>, config: &ExchangeConfig) -> Self {
        Self {
            task_index,
            transport,
            retry_limit: config.send_retry_limit.max(1),
            retry_interval: Duration::from_millis(config.send_retry_interval_ms),
            max_message_bytes: config.max_message_bytes,
        }
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    pub fn send_data(&self, channel: &ChannelId, round: u64, payload: String, target: usize) -> Result<()> {
        self.send(target, channel, round, MessageKind::Data, payload, None)
    }

    pub fn send_data_with_source(
        &self,
        channel: &ChannelId,
        round: u64,
        payload: String,
        target: usize,
    ) -> Result<()> {
        self.send(target, channel, round, MessageKind::Data, payload, Some(self.task_index))
    }

    pub fn send_signal(&self, channel: &ChannelId, round: u64, payload: String, target: usize) -> Result<()> {
        self.send(target, channel, round, MessageKind::Signal, payload, None)
    }

    pub fn send_signal_with_source(
        &self,
        channel: &ChannelId,
        round: u64,
        payload: String,
        target: usize,
    ) -> Result<()> {
        self.send(target, channel, round, MessageKind::Signal, payload, Some(self.task_index))
    }

    /// Blocks until the envelope is delivered or the retry budget is spent.
    fn send(
        &self,
        target: usize,
        channel: &ChannelId,
        round: u64,
        kind: MessageKind,
        payload: String,
        source: Option<usize>,
    ) -> Result<()> {
        let bytes = payload.len();
        if bytes > self.max_message_bytes {
            return Err(GraphexError::Transport(format!(
                "{} message of {bytes} bytes on channel {channel} exceeds the {} byte limit",
                kind.as_str(),
                self.max_message_bytes
            )));
        }
        let envelope = Envelope {
            channel: channel.clone(),
            round,
            kind,
            payload,
            source,
        };

        let mut attempt = 1;
        loop {
            match self.transport.deliver(target, &envelope) {
                Ok(()) => {
                    global_metrics().record_message_sent(self.task_index, kind.as_str(), bytes);
                    return Ok(());
                }
                Err(e) if attempt >= self.retry_limit => {
                    error!(
                        task = self.task_index,
                        peer = target,
                        channel = %channel,
                        attempts = attempt,
                        error = %e,
                        "giving up on message delivery"
                    );
                    return Err(GraphexError::Transport(format!(
                        "delivery of {} message on channel {channel} to worker {target} failed after {attempt} attempts: {e}",
                        kind.as_str()
                    )));
                }
                Err(e) => {
                    warn!(
                        task = self.task_index,
                        peer = target,
                        channel = %channel,
                        attempt,
                        error = %e,
                        "message delivery failed; retrying"
                    );
                    global_metrics().inc_send_retries(self.task_index, target);
                    attempt += 1;
                    thread::sleep(self.retry_interval);
                }
            }
        }
    }
}

/// Delivers straight into the target worker's [`InboundRegistry`].
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    registries: Vec<Arc<InboundRegistry>>,
}

impl InProcessTransport {
    pub fn new(registries: Vec<Arc<InboundRegistry>>) -> Self {
        Self { registries }
    }

    /// Transport plus one registry per worker for an `n`-worker cluster.
    pub fn cluster(n: usize) -> (Arc<Self>, Vec<Arc<InboundRegistry>>) {
        let registries: Vec<_> = (0..n).map(|i| Arc::new(InboundRegistry::new(i))).collect();
        (Arc::new(Self::new(registries.clone())), registries)
    }
}

impl MessageTransport for InProcessTransport {
    fn deliver(&self, target: usize, envelope: &Envelope) -> Result<()> {
        let registry = self.registries.get(target).ok_or_else(|| {
            GraphexError::Transport(format!("unknown worker index {target}"))
        })?;
        registry.deliver(envelope.clone());
        Ok(())
    }
}
