use std::collections::BTreeMap;

use rail_db::utils::HandyRwLock;
use rand::prelude::*;

mod common;

#[test]
fn test_tiny_insert_find() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    tree.insert(&1, &97).unwrap();
    tree.insert(&2, &98).unwrap();
    tree.insert(&1, &99).unwrap();

    assert_eq!(vec![97, 99], tree.find_all(&1).unwrap());
    assert_eq!(vec![98], tree.find_all(&2).unwrap());
    assert!(tree.find_all(&3).unwrap().is_empty());
    assert_eq!(3, tree.size());
    assert_eq!(1, tree.height());

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);
}

#[test]
fn test_empty_tree() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    assert_eq!(0, tree.size());
    assert_eq!(0, tree.height());
    assert!(tree.find_all(&42).unwrap().is_empty());
    assert_eq!(false, tree.remove(&42, &0).unwrap());

    tree.check_integrity(true);
    common::assert_pins_clean(&pool);
}

#[test]
fn test_leaf_split() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    // same key throughout; the 6th insert reaches the split threshold
    for value in 0..=4u32 {
        tree.insert(&0, &value).unwrap();
        assert_eq!(1, tree.height());
    }
    tree.insert(&0, &5).unwrap();
    assert_eq!(2, tree.height());

    tree.insert(&0, &6).unwrap();
    assert_eq!(2, tree.height());

    // one root and exactly two leaves
    assert_eq!(3, pool.rl().pages_on_disk());
    assert_eq!(0, pool.rl().free_page_count());

    assert_eq!(vec![0, 1, 2, 3, 4, 5, 6], tree.find_all(&0).unwrap());
    assert_eq!(7, tree.size());

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);
}

#[test]
fn test_sequential_inserts_build_deep_tree() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    for key in 0..500u32 {
        tree.insert(&key, &(key * 10)).unwrap();
    }

    assert_eq!(500, tree.size());
    assert!(tree.height() >= 3);

    for key in 0..500u32 {
        assert_eq!(vec![key * 10], tree.find_all(&key).unwrap());
    }

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);
}

#[test]
fn test_reverse_inserts() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    for key in (0..300u32).rev() {
        tree.insert(&key, &key).unwrap();
        common::assert_pins_clean(&pool);
    }

    assert_eq!(300, tree.size());
    for key in 0..300u32 {
        assert_eq!(vec![key], tree.find_all(&key).unwrap());
    }

    tree.check_integrity(true);
    tree.check_page_accounting();
}

#[test]
fn test_random_inserts_with_duplicates() {
    common::setup();

    let dir = tempfile::tempdir().unwrap();
    let (pool, mut tree) = common::create_tree(&dir);

    let mut expected: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut rng = rand::thread_rng();

    for _ in 0..1000 {
        let key = rng.gen_range(0, 50);
        let value = rng.gen_range(0, 10000);

        tree.insert(&key, &value).unwrap();
        expected.entry(key).or_default().push(value);
    }

    tree.check_integrity(true);
    tree.check_page_accounting();
    common::assert_pins_clean(&pool);

    for (key, values) in expected.iter_mut() {
        values.sort();
        assert_eq!(*values, tree.find_all(key).unwrap(), "key {}", key);
    }
}
