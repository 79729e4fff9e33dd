//! Storage backends for [`DocumentCache`](crate::DocumentCache).

pub mod bounded;
pub mod memory;

#[doc(inline)]
pub use bounded::MokaStore;
#[doc(inline)]
pub use memory::MemoryStore;
