//! Serialized argument stacks used for virtual calls and events.

use std::collections::VecDeque;

use crate::types::NativeValue;

/// FIFO stack of native values.
///
/// Arguments are written by the caller in declaration order and read by
/// the callee in the same order. Return values travel in a separate stack.
#[derive(Debug, Clone, Default)]
pub struct SerialArgs {
    values: VecDeque<NativeValue>,
}

impl SerialArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stack from values in declaration order
    pub fn from_values(values: impl IntoIterator<Item = NativeValue>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Append a value
    pub fn write(&mut self, value: NativeValue) {
        self.values.push_back(value);
    }

    /// Take the next value
    pub fn read(&mut self) -> Option<NativeValue> {
        self.values.pop_front()
    }

    /// Check if there are values left to read
    pub fn has_more(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the stack, returning the unread values
    pub fn into_values(self) -> Vec<NativeValue> {
        self.values.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut args = SerialArgs::from_values([NativeValue::Int(1), NativeValue::Int(2)]);
        args.write(NativeValue::Int(3));
        assert_eq!(args.len(), 3);
        assert_eq!(args.read(), Some(NativeValue::Int(1)));
        assert_eq!(args.into_values(), vec![NativeValue::Int(2), NativeValue::Int(3)]);
    }

    #[test]
    fn test_exhausted() {
        let mut args = SerialArgs::new();
        assert!(!args.has_more());
        assert_eq!(args.read(), None);
    }
}
