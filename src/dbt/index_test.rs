use arbitrary::{unstructured::Unstructured, Arbitrary};
use rand::{prelude::random, rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};

use std::{convert::TryInto, ffi, fs, path, sync::Arc};

use super::*;
use crate::{
    dbt::{config::Config, store::MemStore},
    Error,
};

fn elem(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

fn value(element: &[u8]) -> u64 {
    u64::from_be_bytes(element.try_into().unwrap())
}

// big-endian encoding keeps byte order == numeric order.
fn byte_cmp() -> Arc<CmpFn> {
    Arc::new(|a: &[u8], b: &[u8]| a.cmp(b))
}

fn mem_index(order: usize, cache_buffers: usize, multi_key: bool) -> Index<MemStore> {
    let mut config = Config::new("test-index", order, 8);
    config.set_cache_buffers(cache_buffers);
    if multi_key {
        config.set_multi_key();
    }
    let store = MemStore::new(config.to_node_size());
    Index::create(config, store, Some(byte_cmp())).unwrap()
}

fn to_vec(index: &mut Index<MemStore>) -> Vec<u64> {
    scan(index)
}

fn scan<S: RecordStore>(index: &mut Index<S>) -> Vec<u64> {
    let mut items = vec![];
    let mut cursor = index.find_begin().unwrap();
    while let Some(element) = cursor.element() {
        items.push(value(element));
        index.iterate_next(&mut cursor).unwrap();
    }
    assert_eq!(cursor.index(), items.len());
    items
}

fn temp_dir(prefix: &str) -> ffi::OsString {
    let dir: path::PathBuf = [
        std::env::temp_dir(),
        format!("ibtree-{}-{:x}", prefix, random::<u64>()).into(),
    ]
    .iter()
    .collect();
    dir.into_os_string()
}

#[test]
fn test_create_open() {
    let dir = temp_dir("create-open");

    // create, populate with an ascending load, order 5 and the
    // minimum of three cache buffers.
    {
        let mut config = Config::new("events", 5, 8);
        config.set_cache_buffers(3);
        let mut index = Index::create_in(&dir, config, Some(byte_cmp())).unwrap();
        assert_eq!(index.to_order(), 5);
        assert_eq!(index.to_element_size(), 8);
        for i in 0..=20 {
            index.insert(&elem(i)).unwrap();
            index.validate().unwrap();
        }
        assert_eq!(index.len().unwrap(), 21);
        index.flush().unwrap();

        let stats = index.to_stats().unwrap();
        assert_eq!(stats.n_count, 21);
        assert_eq!(stats.n_free, 0);
        assert!(stats.n_evicted > 0);
    }

    // reopen and iterate.
    {
        assert!(Index::exists_in(&dir, "events"));
        assert!(!Index::exists_in(&dir, "nosuch"));
        let mut index = Index::open_in(&dir, "events", Some(byte_cmp()), 3, false).unwrap();
        index.validate().unwrap();
        assert_eq!(scan(&mut index), (0..=20).collect::<Vec<u64>>());
        assert_eq!(index.get(&elem(7)).unwrap(), Some(elem(7)));
        assert_eq!(index.get_at(7).unwrap(), elem(7));
    }

    // read-only handles refuse mutation.
    {
        let mut index = Index::open_in(&dir, "events", Some(byte_cmp()), 3, true).unwrap();
        assert!(index.is_rdonly());
        assert_eq!(index.len().unwrap(), 21);
        match index.insert(&elem(100)) {
            Err(Error::ReadOnly(_, _)) => (),
            res => panic!("unexpected {:?}", res),
        }
        match index.remove(&elem(0)) {
            Err(Error::ReadOnly(_, _)) => (),
            res => panic!("unexpected {:?}", res),
        }
    }

    // comparator presence must match the stored options.
    {
        match Index::open_in(&dir, "events", None, 3, false) {
            Err(Error::InvalidInput(_, _)) => (),
            res => panic!("unexpected {:?}", res.map(|i| i.to_order())),
        }
    }

    fs::remove_dir_all(path::Path::new(&dir)).unwrap();
}

#[test]
fn test_random_insert_remove() {
    let seed: u128 = random();
    // let seed: u128 = 137213283964672;
    println!("test_random_insert_remove seed:{}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s
    });

    for (order, cache_buffers) in [(3, 25), (4, 3), (5, 3), (7, 25)] {
        let n: u64 = if cache_buffers == 3 { 150 } else { 400 };
        let mut keys: Vec<u64> = (0..n).collect();
        keys.shuffle(&mut rng);

        let mut index = mem_index(order, cache_buffers, false);
        for (k, key) in keys.iter().enumerate() {
            index.insert(&elem(*key)).unwrap();
            index.validate().unwrap();
            assert_eq!(index.len().unwrap(), k + 1, "order {}", order);
        }
        let mut model: Vec<u64> = (0..n).collect();
        assert_eq!(to_vec(&mut index), model, "order {}", order);
        for i in 0..(n as usize) {
            assert_eq!(index.get_at(i).unwrap(), elem(model[i]));
        }

        keys.shuffle(&mut rng);
        for (k, key) in keys.iter().enumerate() {
            assert_eq!(index.remove(&elem(*key)).unwrap(), elem(*key));
            index.validate().unwrap();
            model.remove(model.binary_search(key).unwrap());
            assert_eq!(index.len().unwrap(), (n as usize) - k - 1);
            assert_eq!(index.contains(&elem(*key)).unwrap(), false);
        }
        assert_eq!(index.len().unwrap(), 0);
        assert!(index.is_empty());
    }
}

// arbitrary op-stream against a sorted model, unique keys, exercised
// through the record-storage flavour.
#[test]
fn test_arbitrary_ops() {
    let seed: u128 = random();
    // let seed: u128 = 137213283964672;
    println!("test_arbitrary_ops seed:{}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let key_max = 256_u64;
    for (order, cache_buffers) in [(3, 25), (4, 3), (6, 25)] {
        let mut index = mem_index(order, cache_buffers, false);
        let mut model: Vec<u64> = vec![];
        let mut counts = [0_usize; 8];

        for _i in 0..1000 {
            let bytes = rng.gen::<[u8; 32]>();
            let mut uns = Unstructured::new(&bytes);

            let op: Op = uns.arbitrary().unwrap();
            // println!("{}-op -- {:?}", _i, op);
            match op {
                Op::Insert(key) => {
                    let key = key % key_max;
                    match model.binary_search(&key) {
                        Ok(_) => match index.insert(&elem(key)) {
                            Err(Error::KeyExists(_, _)) => (),
                            res => panic!("unexpected {:?}", res),
                        },
                        Err(off) => {
                            index.insert(&elem(key)).unwrap();
                            model.insert(off, key);
                        }
                    }
                    counts[0] += 1;
                }
                Op::Put(key) => {
                    let key = key % key_max;
                    let old = index.put(&elem(key)).unwrap();
                    match model.binary_search(&key) {
                        Ok(_) => assert_eq!(old, Some(elem(key))),
                        Err(off) => {
                            assert_eq!(old, None);
                            model.insert(off, key);
                        }
                    }
                    counts[1] += 1;
                }
                Op::Remove(key) => {
                    let key = key % key_max;
                    match model.binary_search(&key) {
                        Ok(off) => {
                            assert_eq!(index.remove(&elem(key)).unwrap(), elem(key));
                            model.remove(off);
                        }
                        Err(_) => match index.remove(&elem(key)) {
                            Err(Error::KeyNotFound(_, _)) => (),
                            res => panic!("unexpected {:?}", res),
                        },
                    }
                    counts[2] += 1;
                }
                Op::RemoveAt(off) => {
                    if !model.is_empty() {
                        let off = (off as usize) % model.len();
                        assert_eq!(index.remove_at(off).unwrap(), elem(model.remove(off)));
                    }
                    counts[3] += 1;
                }
                Op::Get(key) => {
                    let key = key % key_max;
                    let expect = model.binary_search(&key).ok().map(|_| elem(key));
                    assert_eq!(index.get(&elem(key)).unwrap(), expect);
                    counts[4] += 1;
                }
                Op::GetAt(off) => {
                    if !model.is_empty() {
                        let off = (off as usize) % model.len();
                        assert_eq!(index.get_at(off).unwrap(), elem(model[off]));
                    }
                    counts[5] += 1;
                }
                Op::FindLower(key) => {
                    let key = key % key_max;
                    let cursor = index.find_lower(&elem(key)).unwrap();
                    let off = model.binary_search(&key).unwrap_or_else(|off| off);
                    assert_eq!(cursor.index(), off);
                    assert_eq!(cursor.element().map(value), model.get(off).copied());
                    counts[6] += 1;
                }
                Op::Validate => {
                    index.validate().unwrap();
                    counts[7] += 1;
                }
            }
            assert_eq!(index.len().unwrap(), model.len());
        }
        index.validate().unwrap();
        assert_eq!(scan(&mut index), model);
        println!("test_arbitrary_ops order:{} counts:{:?}", order, counts);
    }
}

#[test]
fn test_unique_key_conflict() {
    let mut index = mem_index(4, 25, false);
    for i in 0..50 {
        index.insert(&elem(i)).unwrap();
    }
    match index.insert(&elem(25)) {
        Err(Error::KeyExists(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    // wrong element width.
    match index.insert(&[1, 2, 3]) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert_eq!(index.len().unwrap(), 50);
}

#[test]
fn test_multi_key() {
    let mut index = mem_index(3, 25, true);
    for _ in 0..3 {
        for i in 0..20 {
            index.insert(&elem(i)).unwrap();
        }
        index.validate().unwrap();
    }
    assert_eq!(index.len().unwrap(), 60);

    let lower = index.find_lower(&elem(7)).unwrap();
    let upper = index.find_upper(&elem(7)).unwrap();
    assert_eq!(upper.index() - lower.index(), 3);

    // remove drops one duplicate at a time.
    index.remove(&elem(7)).unwrap();
    index.validate().unwrap();
    let lower = index.find_lower(&elem(7)).unwrap();
    let upper = index.find_upper(&elem(7)).unwrap();
    assert_eq!(upper.index() - lower.index(), 2);
}

#[test]
fn test_rank_only_index() {
    let seed: u128 = random();
    println!("test_rank_only_index seed:{}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let config = Config::new("seq", 4, 8);
    let store = MemStore::new(config.to_node_size());
    let mut index = Index::create(config, store, None).unwrap();

    match index.insert(&elem(1)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    match index.find_lower(&elem(1)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }

    let mut model: Vec<u64> = vec![];
    for v in 0..200 {
        let off = rng.gen_range(0..=model.len());
        index.insert_at(off, &elem(v)).unwrap();
        model.insert(off, v);
        index.validate().unwrap();
    }
    assert_eq!(scan(&mut index), model);

    // replace by rank.
    let old = index.update(7, &elem(100_000)).unwrap();
    assert_eq!(old, elem(model[7]));
    model[7] = 100_000;
    assert_eq!(index.get_at(7).unwrap(), elem(100_000));

    index.put_at(9, &elem(100_001)).unwrap();
    model[9] = 100_001;
    let len = model.len();
    index.put_at(len, &elem(100_002)).unwrap();
    model.push(100_002);
    index.validate().unwrap();
    assert_eq!(scan(&mut index), model);

    while !model.is_empty() {
        let off = rng.gen_range(0..model.len());
        assert_eq!(index.remove_at(off).unwrap(), elem(model.remove(off)));
        index.validate().unwrap();
    }
}

#[test]
fn test_allow_index() {
    let mut config = Config::new("mixed", 4, 8);
    config.set_allow_index();
    let store = MemStore::new(config.to_node_size());
    let mut index = Index::create(config, store, Some(byte_cmp())).unwrap();

    for v in [10, 20, 30, 40] {
        index.insert(&elem(v)).unwrap();
    }
    index.insert_at(1, &elem(15)).unwrap();
    index.validate().unwrap();
    assert_eq!(to_vec(&mut index), vec![10, 15, 20, 30, 40]);

    match index.insert_at(0, &elem(99)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    match index.update(1, &elem(16)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    index.put_at(1, &elem(16)).unwrap();
    assert_eq!(to_vec(&mut index), vec![10, 16, 20, 30, 40]);
}

#[test]
fn test_trim_defrag() {
    let seed: u128 = random();
    println!("test_trim_defrag seed:{}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let mut index = mem_index(3, 25, false);
    let mut keys: Vec<u64> = (0..120).collect();
    keys.shuffle(&mut rng);
    for key in keys.iter() {
        index.insert(&elem(*key)).unwrap();
    }

    // free up records, then compact.
    let mut model: Vec<u64> = (0..120).collect();
    for key in (0..120).step_by(3) {
        index.remove(&elem(key)).unwrap();
        model.remove(model.binary_search(&key).unwrap());
    }
    index.validate().unwrap();
    let before = index.to_stats().unwrap();

    index.trim().unwrap();
    index.validate().unwrap();

    index.defrag().unwrap();
    index.validate().unwrap();
    let after = index.to_stats().unwrap();
    assert_eq!(after.n_free, 0);
    assert!(after.max_recno <= before.max_recno);
    assert_eq!(to_vec(&mut index), model);

    // drain to empty, defrag leaves only the header record.
    for key in model.iter() {
        index.remove(&elem(*key)).unwrap();
    }
    index.defrag().unwrap();
    index.validate().unwrap();
    let stats = index.to_stats().unwrap();
    assert_eq!(stats.n_count, 0);
    assert_eq!(stats.n_free, 0);
    assert_eq!(stats.max_recno, REC_HEADER);
}

#[test]
fn test_cursors() {
    let mut index = mem_index(5, 25, false);
    for i in (0..100).step_by(10) {
        index.insert(&elem(i)).unwrap();
    }

    let lower = index.find_lower(&elem(35)).unwrap();
    assert!(!lower.is_found());
    assert_eq!(lower.element().map(value), Some(40));
    assert_eq!(lower.index(), 4);

    let mut cursor = index.find_at(3).unwrap();
    assert_eq!(cursor.element().map(value), Some(30));
    index.iterate_prev(&mut cursor).unwrap();
    assert_eq!(cursor.element().map(value), Some(20));
    assert_eq!(cursor.index(), 2);

    // past the end, and back.
    let mut cursor = index.find_end().unwrap();
    assert_eq!(cursor.element(), None);
    assert_eq!(cursor.index(), 10);
    match index.iterate_next(&mut cursor) {
        Err(Error::KeyNotFound(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    index.iterate_prev(&mut cursor).unwrap();
    assert_eq!(cursor.element().map(value), Some(90));

    // refresh re-resolves the element copy after a mutation. Use a
    // single-node tree so the removal cannot relocate the cursor's
    // node.
    let mut index = mem_index(5, 25, false);
    for i in [0, 10, 20] {
        index.insert(&elem(i)).unwrap();
    }
    let mut cursor = index.find_at(0).unwrap();
    assert_eq!(cursor.element().map(value), Some(0));
    index.remove(&elem(0)).unwrap();
    assert_eq!(cursor.element().map(value), Some(0)); // stale copy
    index.iterate_refresh(&mut cursor).unwrap();
    assert_eq!(cursor.element().map(value), Some(10));
}

#[test]
fn test_put_update() {
    let mut index = mem_index(4, 25, false);
    assert_eq!(index.put(&elem(10)).unwrap(), None);
    assert_eq!(index.put(&elem(20)).unwrap(), None);
    assert_eq!(index.put(&elem(10)).unwrap(), Some(elem(10)));
    assert_eq!(index.len().unwrap(), 2);

    // update must compare equal under the index comparator.
    match index.update(0, &elem(11)) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert_eq!(index.update(0, &elem(10)).unwrap(), elem(10));
    match index.update(2, &elem(30)) {
        Err(Error::OutOfBound(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
}

#[test]
fn test_reload() {
    let mut index = mem_index(4, 25, false);
    for i in 0..10 {
        index.insert(&elem(i)).unwrap();
    }
    index.flush().unwrap();

    // mutations still sitting in the cache are discarded by reload.
    for i in 10..15 {
        index.insert(&elem(i)).unwrap();
    }
    index.reload().unwrap();
    assert_eq!(index.len().unwrap(), 10);
    assert_eq!(to_vec(&mut index), (0..10).collect::<Vec<u64>>());

    index.insert(&elem(10)).unwrap();
    assert_eq!(index.len().unwrap(), 11);
}

#[test]
fn test_empty_index() {
    let mut index = mem_index(3, 3, false);
    assert_eq!(index.len().unwrap(), 0);
    assert!(index.is_empty());

    let begin = index.find_begin().unwrap();
    assert_eq!(begin.index(), 0);
    assert_eq!(begin.element(), None);
    let end = index.find_end().unwrap();
    assert_eq!(end.index(), 0);

    let lower = index.find_lower(&elem(5)).unwrap();
    assert_eq!(lower.index(), 0);
    assert_eq!(lower.element(), None);

    match index.remove(&elem(5)) {
        Err(Error::KeyNotFound(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    match index.remove_at(0) {
        Err(Error::OutOfBound(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    index.validate().unwrap();
}

#[test]
fn test_refcount_hooks() {
    use std::sync::atomic::{AtomicI64, Ordering::SeqCst};

    let counter = Arc::new(AtomicI64::new(0));
    let mut index = mem_index(4, 25, false);
    let (acq, rel) = (Arc::clone(&counter), Arc::clone(&counter));
    index.set_refcount_hooks(
        Arc::new(move |_: &[u8]| {
            acq.fetch_add(1, SeqCst);
        }),
        Arc::new(move |_: &[u8]| {
            rel.fetch_sub(1, SeqCst);
        }),
    );

    for i in 0..50 {
        index.insert(&elem(i)).unwrap();
    }
    assert_eq!(counter.load(SeqCst), 50);
    index.put(&elem(7)).unwrap();
    assert_eq!(counter.load(SeqCst), 50);
    for i in 0..50 {
        index.remove(&elem(i)).unwrap();
    }
    assert_eq!(counter.load(SeqCst), 0);
}

// persistent round trip with the file backed store and a cache of
// three buffers, the minimum any rebalance needs.
#[test]
fn test_persistent_random() {
    let seed: u128 = random();
    println!("test_persistent_random seed:{}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let dir = temp_dir("persist");
    let mut keys: Vec<u64> = (0..200).collect();
    keys.shuffle(&mut rng);

    {
        let mut config = Config::new("bulk", 4, 8);
        config.set_cache_buffers(3);
        let mut index = Index::create_in(&dir, config, Some(byte_cmp())).unwrap();
        for key in keys.iter() {
            index.insert(&elem(*key)).unwrap();
        }
        index.validate().unwrap();
        // drop flushes the dirty buffers.
    }

    {
        let mut index = Index::open_in(&dir, "bulk", Some(byte_cmp()), 3, false).unwrap();
        index.validate().unwrap();
        assert_eq!(scan(&mut index), (0..200).collect::<Vec<u64>>());

        keys.shuffle(&mut rng);
        for key in keys.iter().take(100) {
            index.remove(&elem(*key)).unwrap();
        }
        index.validate().unwrap();
        index.defrag().unwrap();
        index.validate().unwrap();
        index.flush().unwrap();
    }

    {
        let mut index = Index::open_in(&dir, "bulk", Some(byte_cmp()), 25, false).unwrap();
        index.validate().unwrap();
        assert_eq!(index.len().unwrap(), 100);
        let expect: Vec<u64> = keys.iter().skip(100).copied().collect::<std::collections::BTreeSet<u64>>().into_iter().collect();
        assert_eq!(scan(&mut index), expect);
    }

    fs::remove_dir_all(path::Path::new(&dir)).unwrap();
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    Insert(u64),
    Put(u64),
    Remove(u64),
    RemoveAt(u64),
    Get(u64),
    GetAt(u64),
    FindLower(u64),
    Validate,
}
