//! Record operator contract.

use graphex_common::Result;
use graphex_record::RawRecord;

/// A pull-based operator producing result records one at a time.
///
/// `next` returns `Ok(None)` once the operator is exhausted for the current
/// round; afterwards `is_open` reports `false` until `reset_state`.
pub trait RecordOperator: Send {
    /// Operator name used in logs.
    fn name(&self) -> &'static str;

    /// Produces the next record, blocking if the operator has to wait.
    fn next(&mut self) -> Result<Option<RawRecord>>;

    /// Whether `next` may still yield records in this round.
    fn is_open(&self) -> bool;

    /// Rewinds the operator for another round (repeat-loop iteration).
    fn reset_state(&mut self) -> Result<()>;

    /// Whether the operator's container still holds input for a later round.
    fn has_pending_input(&self) -> bool {
        false
    }
}

/// Boxed operator, the unit operators are chained with.
pub type BoxedOperator = Box<dyn RecordOperator>;

impl<T: RecordOperator + ?Sized> RecordOperator for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn next(&mut self) -> Result<Option<RawRecord>> {
        (**self).next()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn reset_state(&mut self) -> Result<()> {
        (**self).reset_state()
    }

    fn has_pending_input(&self) -> bool {
        (**self).has_pending_input()
    }
}

/// Pulls every remaining record of `op`.
pub fn drain(op: &mut dyn RecordOperator) -> Result<Vec<RawRecord>> {
    let mut out = Vec::new();
    while let Some(record) = op.next()? {
        out.push(record);
    }
    Ok(out)
}
