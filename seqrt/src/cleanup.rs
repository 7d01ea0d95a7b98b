use std::fmt;

use crate::{Heap, Value};

/// Identifies a user routine registered with the calling layer.
pub type RoutineId = usize;

pub type NativeCleanup = Box<dyn FnOnce(&mut Heap, Value)>;

/// One destructor record. The value passed in is the dying value itself,
/// holding a temporary reference for the duration of the call.
pub enum Cleanup {
    Native(NativeCleanup),
    Routine(RoutineId),
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cleanup::Native(_) => f.write_str("Native(..)"),
            Cleanup::Routine(id) => write!(f, "Routine({id})"),
        }
    }
}

/// Destructors attached to a block, run in registration order.
#[derive(Debug, Default)]
pub struct CleanupChain {
    entries: Vec<Cleanup>,
}

impl CleanupChain {
    pub fn push(&mut self, cleanup: Cleanup) {
        self.entries.push(cleanup);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for CleanupChain {
    type Item = Cleanup;
    type IntoIter = std::vec::IntoIter<Cleanup>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The calling layer, executes user routine cleanups.
pub trait CleanupHost {
    fn call_routine(&mut self, heap: &mut Heap, routine: RoutineId, value: Value);
}
