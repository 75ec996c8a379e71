use std::collections::BTreeMap;

use rail_db::utils::HandyRwLock;
use rand::prelude::*;

mod common;

/// Build the two-leaf tree of the split scenario: key 0, values 0..=6.
fn two_leaf_tree(
    dir: &tempfile::TempDir,
) -> (rail_db::Pod<rail_db::BufferPool>, rail_db::BPlusTree<u32, u32>) {
    let (pool, mut tree) = common::create_tree(dir);
    for value in 0..=6u32 {
        tree.insert(&0, &value).unwrap();
    }
    assert_eq!(2, tree.height());
    (pool, tree)
}

#[test]
fn test_borrow_on_delete() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = two_leaf_tree(&dir);

    // the left leaf underflows and refills from its right sibling
    assert!(tree.remove(&0, &0).unwrap());
    assert_eq!(2, tree.height());
    assert_eq!(vec![1, 2, 3, 4, 5, 6], tree.find_all(&0).unwrap());
    tree.check_integrity(true);
    common::assert_pins_clean(&pool);
}

#[test]
fn test_merge_collapses_height() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = two_leaf_tree(&dir);

    for value in 0..=2u32 {
        assert!(tree.remove(&0, &value).unwrap());
        tree.check_integrity(true);
        common::assert_pins_clean(&pool);
    }
    assert!(tree.remove(&0, &3).unwrap());

    // the leaves merged and the lone-child root was retired
    assert_eq!(1, tree.height());
    assert_eq!(3, tree.size());
    assert_eq!(vec![4, 5, 6], tree.find_all(&0).unwrap());

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);
}

#[test]
fn test_remove_missing_pair() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    tree.insert(&7, &70).unwrap();

    assert_eq!(false, tree.remove(&7, &71).unwrap());
    assert_eq!(false, tree.remove(&8, &70).unwrap());
    assert_eq!(1, tree.size());

    // removing a missing pair must not disturb anything
    assert!(tree.remove(&7, &70).unwrap());
    assert_eq!(false, tree.remove(&7, &70).unwrap());
    assert_eq!(0, tree.size());

    tree.check_integrity(true);
    common::assert_pins_clean(&pool);
}

#[test]
fn test_delete_to_empty_tree() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    for key in 0..200u32 {
        tree.insert(&key, &key).unwrap();
    }
    for key in 0..200u32 {
        assert!(tree.remove(&key, &key).unwrap(), "key {}", key);
    }

    // the tree vanished and every page is back on the free stack
    assert_eq!(0, tree.size());
    assert_eq!(0, tree.height());
    assert!(tree.find_all(&0).unwrap().is_empty());
    tree.check_integrity(true);
    tree.check_page_accounting();
    assert_eq!(
        pool.rl().pages_on_disk() as usize,
        pool.rl().free_page_count()
    );
    common::assert_pins_clean(&pool);

    // freed pages get recycled by the next round of inserts
    let pages_before = pool.rl().pages_on_disk();
    for key in 0..50u32 {
        tree.insert(&key, &key).unwrap();
    }
    assert_eq!(pages_before, pool.rl().pages_on_disk());
    tree.check_integrity(true);
}

#[test]
fn test_remove_all() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    for value in 0..20u32 {
        tree.insert(&5, &value).unwrap();
    }
    tree.insert(&4, &1).unwrap();
    tree.insert(&6, &2).unwrap();

    assert_eq!(20, tree.remove_all(&5).unwrap());
    assert!(tree.find_all(&5).unwrap().is_empty());
    assert_eq!(0, tree.remove_all(&5).unwrap());

    // the neighbouring keys survive
    assert_eq!(vec![1], tree.find_all(&4).unwrap());
    assert_eq!(vec![2], tree.find_all(&6).unwrap());
    assert_eq!(2, tree.size());

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);
}

#[test]
fn test_height_never_grows_on_delete() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (_pool, mut tree) = common::create_tree(&dir);

    for key in 0..300u32 {
        tree.insert(&key, &key).unwrap();
    }

    let mut last_height = tree.height();
    for key in 0..300u32 {
        assert!(tree.remove(&key, &key).unwrap());
        assert!(tree.height() <= last_height);
        last_height = tree.height();
    }
    assert_eq!(0, last_height);
}

#[test]
fn test_insert_remove_round_trip() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    for key in 0..150u32 {
        tree.insert(&key, &key).unwrap();
    }

    let height = tree.height();
    let size = tree.size();
    let pages = pool.rl().pages_on_disk();
    let free_count = pool.rl().free_page_count();

    tree.insert(&75, &999).unwrap();
    assert!(tree.remove(&75, &999).unwrap());

    // the observable allocator and tree state is restored
    assert_eq!(height, tree.height());
    assert_eq!(size, tree.size());
    assert_eq!(pages, pool.rl().pages_on_disk());
    assert_eq!(free_count, pool.rl().free_page_count());

    tree.check_integrity(true);
    tree.check_page_accounting();
}

#[test]
fn test_random_churn() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    let mut expected: BTreeMap<(u32, u32), usize> = BTreeMap::new();
    let mut rng = rand::thread_rng();

    for round in 0..2000 {
        let key = rng.gen_range(0, 40);
        let value = rng.gen_range(0, 100);

        if rng.gen_range(0, 3) > 0 {
            tree.insert(&key, &value).unwrap();
            *expected.entry((key, value)).or_insert(0) += 1;
        } else {
            let removed = tree.remove(&key, &value).unwrap();
            let counter = expected.entry((key, value)).or_insert(0);
            assert_eq!(*counter > 0, removed, "round {}", round);
            if *counter > 0 {
                *counter -= 1;
            }
        }
    }

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);

    let total: usize = expected.values().sum();
    assert_eq!(total as u64, tree.size());

    for key in 0..40u32 {
        let mut values = Vec::new();
        for ((k, v), count) in &expected {
            if k == &key {
                for _ in 0..*count {
                    values.push(*v);
                }
            }
        }
        assert_eq!(values, tree.find_all(&key).unwrap(), "key {}", key);
    }
}
