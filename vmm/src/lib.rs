//! Virtual memory core of a simulated machine: address translation through an
//! optional translation cache, demand paging from an executable image, and
//! eviction to swap under FIFO or LRU replacement.

pub mod address_space;
pub mod bitmap;
pub mod config;
pub mod error;
pub mod memory;
pub mod mmu;
pub mod page_loader;
pub mod page_replacer;
pub mod page_table;
pub mod pager;
pub mod tlb;

pub use address_space::AddressSpace;
pub use config::MachineConfig;
pub use error::{Resource, Result, VmError};
pub use mmu::{Mmu, SpaceId};
pub use page_loader::{MemoryImage, PageLoader};
pub use page_replacer::ReplacementPolicy;
