//! Port allocation for applet servers

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use super::{lock, AppletError};

/// Hands out ports from a fixed inclusive range. One allocator may be shared
/// by many launchers; allocation and release are serialized.
#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    allocated: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            allocated: Mutex::new(BTreeSet::new()),
        }
    }

    /// Lowest free port in the range
    pub fn allocate(&self) -> Result<u16, AppletError> {
        let mut allocated = lock(&self.allocated);
        let port = self
            .range
            .clone()
            .find(|port| !allocated.contains(port))
            .ok_or(AppletError::PortsExhausted {
                start: *self.range.start(),
                end: *self.range.end(),
            })?;
        allocated.insert(port);
        Ok(port)
    }

    /// False if the port was not allocated
    pub fn release(&self, port: u16) -> bool {
        lock(&self.allocated).remove(&port)
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        lock(&self.allocated).contains(&port)
    }

    pub fn in_use(&self) -> usize {
        lock(&self.allocated).len()
    }

    pub fn capacity(&self) -> usize {
        self.range.clone().count()
    }
}
