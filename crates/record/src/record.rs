use graphex_common::{GraphexError, Result};

use crate::field::FieldObject;

/// One result row: fixed-arity, position-significant field slots.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub fields: Vec<Option<FieldObject>>,
    /// Cleared on copies that only feed a side effect and must not reach the
    /// final result.
    pub need_return: bool,
}

impl Default for RawRecord {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RawRecord {
    pub fn new(fields: Vec<Option<FieldObject>>) -> Self {
        Self {
            fields,
            need_return: true,
        }
    }

    /// Record with `arity` empty slots.
    pub fn with_arity(arity: usize) -> Self {
        Self::new(vec![None; arity])
    }

    pub fn from_fields(fields: impl IntoIterator<Item = FieldObject>) -> Self {
        Self::new(fields.into_iter().map(Some).collect())
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, slot: usize) -> Option<&FieldObject> {
        self.fields.get(slot).and_then(Option::as_ref)
    }

    pub fn set(&mut self, slot: usize, field: FieldObject) -> Result<()> {
        let arity = self.fields.len();
        let target = self.fields.get_mut(slot).ok_or_else(|| {
            GraphexError::Execution(format!("slot {slot} out of range for arity {arity}"))
        })?;
        *target = Some(field);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_respects_fixed_arity() {
        let mut record = RawRecord::with_arity(2);
        record.set(1, FieldObject::scalar(5)).expect("in range");
        assert_eq!(record.get(1), Some(&FieldObject::scalar(5)));
        assert!(record.get(0).is_none());
        assert!(record.set(2, FieldObject::scalar(6)).is_err());
        assert!(record.need_return);
    }
}
