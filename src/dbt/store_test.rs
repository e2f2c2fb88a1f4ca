use super::*;

#[test]
fn test_mem_store() {
    let mut store = MemStore::new(16);
    assert_eq!(store.record_len(), 16);

    assert_eq!(store.append(&[1_u8; 16]).unwrap(), 1);
    assert_eq!(store.append(&[2_u8; 16]).unwrap(), 2);
    assert_eq!(store.append(&[3_u8; 16]).unwrap(), 3);

    let mut data = vec![0_u8; 16];
    store.get(2, &mut data).unwrap();
    assert_eq!(data, vec![2_u8; 16]);

    store.put(2, &[9_u8; 16]).unwrap();
    store.get(2, &mut data).unwrap();
    assert_eq!(data, vec![9_u8; 16]);

    // record numbers are 1 based.
    assert!(store.get(0, &mut data).is_err());
    assert!(store.get(4, &mut data).is_err());
    // records are fixed length.
    assert!(store.append(&[0_u8; 8]).is_err());
    assert!(store.put(1, &[0_u8; 8]).is_err());

    // only the trailing record can be erased.
    assert!(store.del(2).is_err());
    store.del(3).unwrap();
    assert!(store.get(3, &mut data).is_err());
    assert_eq!(store.append(&[4_u8; 16]).unwrap(), 3);
    store.sync().unwrap();
}
