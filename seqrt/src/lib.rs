mod allocator;
mod block;
mod cleanup;
mod compare;
mod dispatch;
mod error;
mod format;
mod heap;
mod ops;
mod sequence;
mod splice;
mod value;

pub use allocator::*;
pub use block::*;
pub use cleanup::*;
pub use error::*;
pub use heap::{Heap, HeapCreateInfo, HeapSettings, HeapStats};
pub use ops::*;
pub use sequence::check_slice;
pub use value::*;
