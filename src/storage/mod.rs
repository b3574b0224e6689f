//! Value storage: in-memory and spill-to-disk backends, and per-variable holders

mod holder;
mod in_memory;
mod memory_config;
mod on_disk;

pub use holder::{Holder, HolderMemoryUsage, MemoryMeter, SpillSettings};
pub use in_memory::{InMemoryStorage, MemoryUsage};
pub use memory_config::{MemoryConfig, DEFAULT_MEMORY_BUDGET_BYTES};
pub use on_disk::OnDiskStorage;

pub(crate) use on_disk::{read_json, write_json, StoredArray};
