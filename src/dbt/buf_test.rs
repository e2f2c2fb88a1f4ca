use super::*;

#[test]
fn test_u32() {
    let mut data = vec![0_u8; 16];
    set_u32(&mut data, 4, 0xdead_beef);
    assert_eq!(get_u32(&data, 4), 0xdead_beef);
    assert_eq!(&data[4..8], &0xdead_beef_u32.to_le_bytes());
    assert_eq!(get_u32(&data, 0), 0);

    add_u32(&mut data, 4, 1);
    assert_eq!(get_u32(&data, 4), 0xdead_bef0);
    add_u32(&mut data, 4, -0x10);
    assert_eq!(get_u32(&data, 4), 0xdead_bee0);
}

#[test]
fn test_rec() {
    let mut data = vec![0_u8; 24];
    set_rec(&mut data, 8, u64::MAX - 1);
    assert_eq!(get_rec(&data, 8), u64::MAX - 1);
    assert_eq!(get_rec(&data, 0), 0);
}

#[test]
fn test_data() {
    let mut data = vec![0_u8; 16];
    set_data(&mut data, 2, &[1, 2, 3, 4]);
    let mut out = [0_u8; 4];
    get_data(&data, 2, &mut out);
    assert_eq!(out, [1, 2, 3, 4]);
}

#[test]
fn test_move_internal() {
    let mut data: Vec<u8> = (0..10).collect();
    // overlapping shift right.
    move_internal(&mut data, 3, 2, 5);
    assert_eq!(data, vec![0, 1, 2, 2, 3, 4, 5, 6, 8, 9]);
    // overlapping shift left.
    let mut data: Vec<u8> = (0..10).collect();
    move_internal(&mut data, 2, 3, 5);
    assert_eq!(data, vec![0, 1, 3, 4, 5, 6, 7, 7, 8, 9]);
}

#[test]
fn test_fill() {
    let mut data = vec![1_u8; 8];
    fill(&mut data, 2, 0, 4);
    assert_eq!(data, vec![1, 1, 0, 0, 0, 0, 1, 1]);
}
