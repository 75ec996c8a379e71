use std::sync::Arc;

use rail_db::{
    io::{Decodeable, DiskSize, Encodeable, RailWriter},
    utils::{self, HandyRwLock},
    BPlusTree, BufferPool, ConfigStore, Indexed, Pod,
};
use tempfile::TempDir;

/// Small-batch node capacity, so a handful of pairs already builds a deep
/// tree (split threshold 6, merge threshold 2).
pub const NODE_CAPACITY: usize = 8;

/// # Conduct the initialization
///
/// - Setting up log configurations.
pub fn setup() {
    utils::init_log();
}

/// A tree over its own freshly created pool and config store, everything
/// inside `dir` so parallel tests never share files.
pub fn create_tree(dir: &TempDir) -> (Pod<BufferPool>, BPlusTree<u32, u32>) {
    let pool = BufferPool::open(dir.path().join("tickets.db")).unwrap();
    let config = ConfigStore::open(dir.path().join("tickets.config")).unwrap();
    let tree = BPlusTree::open(Arc::clone(&pool), &config)
        .unwrap()
        .with_node_capacity(NODE_CAPACITY);
    (pool, tree)
}

/// Same as `create_tree`, with a caller-chosen frame count for the pool.
pub fn create_tree_with_slots(
    dir: &TempDir,
    slot_count: usize,
) -> (Pod<BufferPool>, BPlusTree<u32, u32>) {
    let pool = BufferPool::open_with_slots(dir.path().join("tickets.db"), slot_count).unwrap();
    let config = ConfigStore::open(dir.path().join("tickets.config")).unwrap();
    let tree = BPlusTree::open(Arc::clone(&pool), &config)
        .unwrap()
        .with_node_capacity(NODE_CAPACITY);
    (pool, tree)
}

/// Every public call must leave the pool with zero pinned frames.
pub fn assert_pins_clean(pool: &Pod<BufferPool>) {
    assert_eq!(
        0,
        pool.rl().pinned_frames_count(),
        "a reference outlived its operation"
    );
}

/// A fat tree value: a ticket order with a dense order id and an opaque
/// passenger tag. Interior nodes only replicate the id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Order {
    pub id: u32,
    pub passenger: [u8; 8],
}

impl Order {
    pub fn new(id: u32, passenger: &str) -> Self {
        let mut tag = [0u8; 8];
        let bytes = passenger.as_bytes();
        tag[..bytes.len()].copy_from_slice(bytes);
        Self { id, passenger: tag }
    }
}

impl Encodeable for Order {
    fn encode(&self) -> Vec<u8> {
        let mut writer = RailWriter::new();
        writer.write(&self.id);
        let mut buf = writer.to_bytes();
        buf.extend_from_slice(&self.passenger);
        buf
    }
}

impl Decodeable for Order {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let id = u32::decode_from(reader);
        let bytes = rail_db::io::read_exact(reader, 8);
        let mut passenger = [0u8; 8];
        passenger.copy_from_slice(&bytes);
        Self { id, passenger }
    }
}

impl DiskSize for Order {
    const DISK_SIZE: usize = 12;
}

impl Indexed for Order {
    type Id = u32;

    fn id(&self) -> u32 {
        self.id
    }
}
