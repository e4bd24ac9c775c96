//! Leaf operators feeding records into an operator chain.

use std::sync::Arc;

use graphex_common::Result;
use graphex_record::RawRecord;

use crate::buffer::BoundedBuffer;
use crate::operator::RecordOperator;

/// Replays a fixed list of records every round.
#[derive(Debug, Clone)]
pub struct VecSource {
    records: Vec<RawRecord>,
    cursor: usize,
}

impl VecSource {
    /// Source over `records`, in order.
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records, cursor: 0 }
    }
}

impl RecordOperator for VecSource {
    fn name(&self) -> &'static str {
        "VecSource"
    }

    fn next(&mut self) -> Result<Option<RawRecord>> {
        let record = self.records.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        Ok(record)
    }

    fn is_open(&self) -> bool {
        self.cursor < self.records.len()
    }

    fn reset_state(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

/// How a [`BufferSource`] ends a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Block until the producer closes the buffer.
    UntilClosed,
    /// End the round as soon as the buffer is momentarily empty; records
    /// added later belong to the next round.
    Available,
}

/// Consumer end of a [`BoundedBuffer`].
#[derive(Debug)]
pub struct BufferSource {
    buffer: Arc<BoundedBuffer<RawRecord>>,
    mode: DrainMode,
    open: bool,
}

impl BufferSource {
    /// Source draining `buffer` according to `mode`.
    pub fn new(buffer: Arc<BoundedBuffer<RawRecord>>, mode: DrainMode) -> Self {
        Self {
            buffer,
            mode,
            open: true,
        }
    }
}

impl RecordOperator for BufferSource {
    fn name(&self) -> &'static str {
        "BufferSource"
    }

    fn next(&mut self) -> Result<Option<RawRecord>> {
        if !self.open {
            return Ok(None);
        }
        let record = match self.mode {
            DrainMode::UntilClosed => self.buffer.retrieve(),
            DrainMode::Available => self.buffer.try_retrieve(),
        };
        if record.is_none() {
            self.open = false;
        }
        Ok(record)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reset_state(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    /// True while the producer has not closed the buffer or records remain.
    fn has_pending_input(&self) -> bool {
        self.buffer.has_more()
    }
}
