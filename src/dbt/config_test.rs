use super::*;

#[test]
fn test_config() {
    let mut config = Config::new("events", 5, 8);
    assert_eq!(config.cache_buffers, DEFAULT_CACHE_BUFFERS);
    config.set_cache_buffers(3).set_multi_key().set_insert_lower();
    config.validate().unwrap();
    // |parent|fill| + 4 elements + 5 links + 5 cimap entries
    assert_eq!(config.to_node_size(), 12 + 4 * 8 + 5 * 16 + 5 * 12);
}

#[test]
fn test_config_validate() {
    assert!(Config::new("x", 2, 8).validate().is_err());
    assert!(Config::new("x", 3, 0).validate().is_err());
    assert!(Config::new("x", 3, 8).set_cache_buffers(2).validate().is_err());
    assert!(Config::new("x", 3, 8).set_insert_lower().validate().is_err());
    let name: String = std::iter::repeat('a').take(MAX_NAME_LEN + 1).collect();
    assert!(Config::new(&name, 3, 8).validate().is_err());
    Config::new("x", 3, 8).validate().unwrap();
}

#[test]
fn test_index_location() {
    let loc = to_index_location(std::ffi::OsStr::new("/tmp/data"), "events");
    assert_eq!(loc, std::ffi::OsString::from("/tmp/data/events.btree"));
}
