//! The persistent storage engine of a train-ticket reservation back-end.
//!
//! The engine is a single-threaded stack of four pieces: a pager over one
//! data file, a fixed-frame buffer pool with LRU-K eviction on top of it, a
//! generic on-disk B+ tree whose nodes live in buffer pool pages, and a
//! pair of flat-file containers (segment lists, naive lists) plus a scalar
//! config store for everything that has to survive a restart. The ticket
//! business rules, command parser and text I/O live above this crate and
//! only talk to the types re-exported here.
//!
//! Durability is "flush on clean shutdown": `BufferPool::close` writes every
//! dirty frame and the page allocator state, config slots write themselves
//! back when dropped. A crash in between loses the work since the last
//! shutdown.

pub mod btree;
pub mod error;
pub mod io;
pub mod storage;
pub mod types;
pub mod utils;

pub use btree::indexed::Indexed;
pub use btree::tree::BPlusTree;
pub use error::{ErrorKind, RailError};
pub use storage::buffer_pool::BufferPool;
pub use storage::config::{ConfigStore, Slot};
pub use storage::handle::Handle;
pub use storage::segment::{NaiveList, Segment, SegmentList};
pub use types::{Pod, RailResult};
