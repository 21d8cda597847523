//! Command handlers: what an `@package/name` instruction resolves to

use async_trait::async_trait;
use indexmap::IndexMap;

use super::{Registry, RegistryItem};
use crate::interpreter::types::{ActionResult, ExecutionContext, Value};

/// Evaluated instruction arguments, in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(IndexMap<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Missing arguments read as `Absent`
    pub fn get(&self, name: &str) -> &Value {
        static ABSENT: Value = Value::Absent;
        self.0.get(name).unwrap_or(&ABSENT)
    }

    /// Present and not `Absent`
    pub fn has(&self, name: &str) -> bool {
        !self.get(name).is_absent()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).as_str()
    }

    pub fn num(&self, name: &str) -> Option<f64> {
        self.get(name).as_f64()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A registered action.
///
/// `Ok` results (including failed ones) are recorded and the program goes on;
/// an `Err` is an unrecovered error that halts the program.
#[async_trait]
pub trait CommandHandler: RegistryItem {
    async fn run(&self, args: Arguments, context: &ExecutionContext)
        -> anyhow::Result<ActionResult>;
}

pub type CommandRegistry = Registry<dyn CommandHandler>;
