use crate::LruCache;
use std::sync::Arc;

#[test]
fn get_counts_hits_and_misses() {
    let cache: LruCache<u32, String> = LruCache::new(100);
    assert!(cache.get(&1).is_none());
    cache.insert(1, Arc::new("one".into()), 10);
    assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("one"));
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 1);
}

#[test]
fn evicts_least_recently_used_first() {
    let cache: LruCache<u32, u32> = LruCache::new(30);
    cache.insert(1, Arc::new(1), 10);
    cache.insert(2, Arc::new(2), 10);
    cache.insert(3, Arc::new(3), 10);
    // touch 1 so 2 becomes the oldest
    assert!(cache.get(&1).is_some());
    cache.insert(4, Arc::new(4), 10);

    assert!(cache.get(&2).is_none());
    assert!(cache.get(&1).is_some());
    assert!(cache.get(&3).is_some());
    assert!(cache.get(&4).is_some());
    assert_eq!(cache.usage(), 30);
}

#[test]
fn replacing_a_key_adjusts_usage() {
    let cache: LruCache<&str, u32> = LruCache::new(100);
    cache.insert("k", Arc::new(1), 40);
    cache.insert("k", Arc::new(2), 25);
    assert_eq!(cache.usage(), 25);
    assert_eq!(cache.len(), 1);
    assert_eq!(*cache.get(&"k").unwrap(), 2);
}

#[test]
fn oversized_entry_is_returned_but_not_kept() {
    let cache: LruCache<u32, Vec<u8>> = LruCache::new(8);
    let v = cache.insert(7, Arc::new(vec![0; 64]), 64);
    assert_eq!(v.len(), 64);
    assert!(cache.is_empty());
    assert_eq!(cache.usage(), 0);
}

#[test]
fn evicted_values_stay_alive_for_holders() {
    let cache: LruCache<u32, Vec<u8>> = LruCache::new(10);
    let held = cache.insert(1, Arc::new(vec![1, 2, 3]), 10);
    cache.insert(2, Arc::new(vec![4]), 10);
    assert!(cache.get(&1).is_none());
    assert_eq!(*held, vec![1, 2, 3]);
}

#[test]
fn shrinking_capacity_evicts() {
    let cache: LruCache<u32, u32> = LruCache::new(100);
    for i in 0..10 {
        cache.insert(i, Arc::new(i), 10);
    }
    cache.set_capacity(35);
    assert_eq!(cache.capacity(), 35);
    assert_eq!(cache.len(), 3);
    assert!(cache.get(&9).is_some());
    assert!(cache.get(&0).is_none());
}

#[test]
fn erase_if_drops_matching_keys() {
    let cache: LruCache<(u64, u64), u32> = LruCache::new(1000);
    cache.insert((1, 0), Arc::new(0), 1);
    cache.insert((1, 4096), Arc::new(1), 1);
    cache.insert((2, 0), Arc::new(2), 1);
    cache.erase_if(|k| k.0 == 1);
    assert_eq!(cache.len(), 1);
    cache.erase(&(2, 0));
    assert!(cache.is_empty());
}
