use rand::{prelude::random, rngs::SmallRng, seq::SliceRandom, SeedableRng};

use std::cmp::Ordering;

use crate::{mem::Index, Error};

fn by_value(a: &u64, b: &u64, _: &()) -> Ordering {
    a.cmp(b)
}

#[test]
fn test_cursor_round_trip() {
    let seed: u128 = random();
    println!("test_cursor_round_trip seed:{}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s
    });

    for order in [3, 4, 7] {
        let mut keys: Vec<u64> = (0..250).collect();
        keys.shuffle(&mut rng);
        let mut index = Index::with_cmp("iter", order, (), by_value).unwrap();
        for key in keys.into_iter() {
            index.insert(key).unwrap();
        }

        // walk forward to the end.
        let mut cursor = index.find_begin();
        for i in 0..250 {
            assert_eq!(index.element(&cursor), Some(&i));
            assert_eq!(cursor.index(), i as usize);
            index.iterate_next(&mut cursor).unwrap();
        }
        assert_eq!(index.element(&cursor), None);
        assert_eq!(cursor.index(), 250);
        match index.iterate_next(&mut cursor) {
            Err(Error::KeyNotFound(_, _)) => (),
            res => panic!("unexpected {:?}", res),
        }

        // and back to the beginning.
        for i in (0..250).rev() {
            index.iterate_prev(&mut cursor).unwrap();
            assert_eq!(index.element(&cursor), Some(&i));
        }
        match index.iterate_prev(&mut cursor) {
            Err(Error::KeyNotFound(_, _)) => (),
            res => panic!("unexpected {:?}", res),
        }
    }
}

#[test]
fn test_find_bounds() {
    let mut index = Index::with_cmp("bounds", 4, (), by_value).unwrap();
    for key in (0..100).step_by(10) {
        index.insert(key).unwrap(); // 0, 10, .. 90
    }

    // exact hit.
    let lower = index.find_lower(&30).unwrap();
    assert!(lower.is_found());
    assert_eq!(index.element(&lower), Some(&30));
    assert_eq!(lower.index(), 3);

    // miss lands on the next greater element.
    let lower = index.find_lower(&35).unwrap();
    assert!(!lower.is_found());
    assert_eq!(index.element(&lower), Some(&40));
    assert_eq!(lower.index(), 4);

    let upper = index.find_upper(&30).unwrap();
    assert_eq!(index.element(&upper), Some(&40));

    // everything smaller than the key.
    let lower = index.find_lower(&1000).unwrap();
    assert_eq!(index.element(&lower), None);
    assert_eq!(lower.index(), 10);

    // everything greater than the key.
    let lower = index.find_lower(&0).unwrap();
    assert_eq!(lower.index(), 0);
    assert_eq!(index.element(&lower), Some(&0));
}

#[test]
fn test_iter_adapter() {
    let mut index = Index::with_cmp("scan", 5, (), by_value).unwrap();
    assert_eq!(index.iter().count(), 0);
    for key in [5_u64, 1, 9, 3, 7] {
        index.insert(key).unwrap();
    }
    let items: Vec<u64> = index.iter().copied().collect();
    assert_eq!(items, vec![1, 3, 5, 7, 9]);
    assert_eq!(index.iter().max(), Some(&9));
}
