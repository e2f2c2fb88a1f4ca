use super::*;

use crate::{dbt::store::MemStore, Error};

fn new_store(n: usize) -> MemStore {
    let mut store = MemStore::new(8);
    for i in 0..n {
        store.append(&(i as u64).to_be_bytes()).unwrap();
    }
    store
}

#[test]
fn test_cache_hits() {
    let mut store = new_store(5);
    let mut cache = Cache::new(3, 8);

    let slot = cache.get(&mut store, 1).unwrap();
    assert_eq!(cache.data(slot), &0_u64.to_be_bytes());
    let again = cache.get(&mut store, 1).unwrap();
    assert_eq!(slot, again);
    assert_eq!(cache.n_gets, 2);
    assert_eq!(cache.n_hits, 1);
}

#[test]
fn test_cache_eviction() {
    let mut store = new_store(5);
    let mut cache = Cache::new(3, 8);

    for recno in 1..=5 {
        let slot = cache.get(&mut store, recno).unwrap();
        assert_eq!(cache.data(slot), &(recno - 1).to_be_bytes());
    }
    assert!(cache.n_evicted >= 2);

    // a dirty buffer is written back when evicted.
    let slot = cache.get(&mut store, 1).unwrap();
    cache.data_mut(slot).copy_from_slice(&99_u64.to_be_bytes());
    for recno in 2..=5 {
        cache.get(&mut store, recno).unwrap();
    }
    let mut data = vec![0_u8; 8];
    store.get(1, &mut data).unwrap();
    assert_eq!(data, 99_u64.to_be_bytes());
}

#[test]
fn test_cache_pins() {
    let mut store = new_store(5);
    let mut cache = Cache::new(3, 8);

    let s1 = cache.get(&mut store, 1).unwrap();
    cache.pin(s1);
    let s2 = cache.get(&mut store, 2).unwrap();
    cache.pin(s2);
    let s3 = cache.get(&mut store, 3).unwrap();
    cache.pin(s3);

    match cache.get(&mut store, 4) {
        Err(Error::CacheExhausted(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }

    cache.unpin(s2);
    let s4 = cache.get(&mut store, 4).unwrap();
    assert_eq!(s4, s2);

    cache.unpin(s1);
    cache.unpin(s3);
    cache.cleanup();
}

#[test]
fn test_cache_flush() {
    let mut store = new_store(3);
    let mut cache = Cache::new(3, 8);

    for recno in 1..=3 {
        let slot = cache.get(&mut store, recno).unwrap();
        cache.data_mut(slot).copy_from_slice(&(recno + 100).to_be_bytes());
    }
    cache.flush(&mut store).unwrap();

    let mut data = vec![0_u8; 8];
    for recno in 1..=3 {
        store.get(recno, &mut data).unwrap();
        assert_eq!(data, (recno + 100).to_be_bytes());
    }
    // pool is empty after a flush, the next get is a miss.
    let n_gets = cache.n_gets;
    cache.get(&mut store, 1).unwrap();
    assert_eq!(cache.n_gets, n_gets + 1);
    assert_eq!(cache.n_hits, 0);

    cache.clear();
    cache.cleanup();
}

#[test]
fn test_cache_install() {
    let mut store = new_store(2);
    let mut cache = Cache::new(3, 8);

    let slot = cache.install(&mut store, 7, true).unwrap();
    assert_eq!(cache.data(slot), &[0_u8; 8]);
    let again = cache.get(&mut store, 7).unwrap();
    assert_eq!(slot, again);

    let slot = cache.get(&mut store, 1).unwrap();
    cache.forget(slot);
    // forgotten buffer is a miss again.
    let hits = cache.n_hits;
    cache.get(&mut store, 1).unwrap();
    assert_eq!(cache.n_hits, hits);
}
