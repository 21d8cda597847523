//! Pipe functions: the `| name:arg` stages of a braced expression

use super::{Registry, RegistryItem};
use crate::interpreter::types::Value;

/// Synchronous value transformation
pub trait PipeFunction: RegistryItem {
    fn execute(&self, input: Value, args: &[Value]) -> anyhow::Result<Value>;
}

pub type PipeRegistry = Registry<dyn PipeFunction>;
