use rand::prelude::random;

use std::{ffi, fs, path};

use super::*;
use crate::Error;

fn temp_loc(prefix: &str) -> ffi::OsString {
    let loc: path::PathBuf = [
        std::env::temp_dir(),
        format!("ibtree-{}-{:x}.store", prefix, random::<u64>()).into(),
    ]
    .iter()
    .collect();
    loc.into_os_string()
}

#[test]
fn test_index_file_name() {
    let name = IndexFileName::from("events".to_string());
    let loc: ffi::OsString = name.into();
    assert_eq!(loc, ffi::OsString::from("events.btree"));
}

#[test]
fn test_file_store() {
    let loc = temp_loc("files");

    {
        let mut store = FileStore::create(&loc, 32).unwrap();
        assert_eq!(store.record_len(), 32);
        assert_eq!(store.append(&[1_u8; 32]).unwrap(), 1);
        assert_eq!(store.append(&[2_u8; 32]).unwrap(), 2);
        store.put(1, &[7_u8; 32]).unwrap();
        store.sync().unwrap();
    }

    {
        let mut store = FileStore::open(&loc, false).unwrap();
        assert_eq!(store.record_len(), 32);
        let mut data = vec![0_u8; 32];
        store.get(1, &mut data).unwrap();
        assert_eq!(data, vec![7_u8; 32]);
        store.get(2, &mut data).unwrap();
        assert_eq!(data, vec![2_u8; 32]);
        assert!(store.get(3, &mut data).is_err());

        assert!(store.del(1).is_err()); // not the trailing record
        store.del(2).unwrap();
        assert!(store.get(2, &mut data).is_err());
        assert_eq!(store.append(&[3_u8; 32]).unwrap(), 2);
    }

    assert!(FileStore::exists(&loc));
    fs::remove_file(path::Path::new(&loc)).unwrap();
    assert!(!FileStore::exists(&loc));
}

#[test]
fn test_file_store_rdonly() {
    let loc = temp_loc("rdonly");
    {
        let mut store = FileStore::create(&loc, 16).unwrap();
        store.append(&[5_u8; 16]).unwrap();
    }

    let mut store = FileStore::open(&loc, true).unwrap();
    let mut data = vec![0_u8; 16];
    store.get(1, &mut data).unwrap();
    assert_eq!(data, vec![5_u8; 16]);

    match store.put(1, &[0_u8; 16]) {
        Err(Error::ReadOnly(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    match store.append(&[0_u8; 16]) {
        Err(Error::ReadOnly(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    match store.del(1) {
        Err(Error::ReadOnly(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }

    std::mem::drop(store);
    fs::remove_file(path::Path::new(&loc)).unwrap();
}

#[test]
fn test_file_store_bad_file() {
    let loc = temp_loc("bad");
    fs::write(path::Path::new(&loc), b"garbage").unwrap();
    match FileStore::open(&loc, false) {
        Err(Error::IOError(_, _)) | Err(Error::InvalidFile(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|s| s.record_len())),
    }
    fs::remove_file(path::Path::new(&loc)).unwrap();
}
