//! Backing data structures handing out slots and indices: the bitset [`IndexAllocator`] and the generational
//! [`GenerationalHandlePool`] with its [`Handle`]s.

pub mod handle;
pub mod index_allocator;
pub mod pool;
pub mod slot_array;

pub use handle::*;
pub use index_allocator::*;
pub use pool::*;
