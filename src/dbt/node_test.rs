use super::*;

fn layout() -> Layout {
    Layout { order: 4, element_size: 8 }
}

#[test]
fn test_layout_offsets() {
    let lay = layout();
    // |parent(8)|fill(4)|elements 3*8|links 4*16|cimap 4*12|
    assert_eq!(lay.node_size(), 12 + 24 + 64 + 48);
    assert_eq!(lay.off_element(0), SIZE_NODE_HEADER);
    assert_eq!(lay.off_element(1), SIZE_NODE_HEADER + 8);
    assert_eq!(lay.off_link(0), SIZE_NODE_HEADER + 24);
    assert_eq!(lay.off_link(1), SIZE_NODE_HEADER + 24 + SIZE_LINK);
    assert_eq!(lay.off_cimap(0), SIZE_NODE_HEADER + 24 + 4 * SIZE_LINK);
}

#[test]
fn test_node_fields() {
    let lay = layout();
    let mut data = vec![0_u8; lay.node_size()];

    lay.set_parent(&mut data, 77);
    lay.set_fill(&mut data, 3);
    assert_eq!(lay.parent(&data), 77);
    assert_eq!(lay.fill(&data), 3);

    lay.set_element(&mut data, 1, &42_u64.to_be_bytes());
    assert_eq!(lay.element(&data, 1), &42_u64.to_be_bytes());

    assert!(lay.is_leaf(&data));
    let link = Link { offset: 4, count: 9, child: 13 };
    lay.set_link(&mut data, 0, &link);
    assert!(!lay.is_leaf(&data));
    assert_eq!(lay.link(&data, 0), link);
    assert_eq!(lay.link_child(&data, 0), 13);

    lay.add_link_count(&mut data, 0, -4);
    lay.add_link_offset(&mut data, 0, 2);
    let link = lay.link(&data, 0);
    assert_eq!((link.offset, link.count), (6, 5));
}

#[test]
fn test_cimap() {
    let lay = layout();
    let mut data = vec![0_u8; lay.node_size()];
    lay.set_fill(&mut data, 3); // cimap scan covers the full map

    lay.cimap_put(&mut data, 30, 0);
    lay.cimap_put(&mut data, 10, 1);
    lay.cimap_put(&mut data, 20, 2);
    assert_eq!(lay.cimap_get(&data, 10), Some(1));
    assert_eq!(lay.cimap_get(&data, 20), Some(2));
    assert_eq!(lay.cimap_get(&data, 30), Some(0));
    assert_eq!(lay.cimap_get(&data, 40), None);

    // update in place.
    lay.cimap_put(&mut data, 20, 3);
    assert_eq!(lay.cimap_get(&data, 20), Some(3));

    lay.cimap_inc(&mut data, 1);
    assert_eq!(lay.cimap_get(&data, 10), Some(2));
    assert_eq!(lay.cimap_get(&data, 20), Some(4));
    assert_eq!(lay.cimap_get(&data, 30), Some(0));

    lay.cimap_dec(&mut data, 2);
    assert_eq!(lay.cimap_get(&data, 10), Some(1));
    assert_eq!(lay.cimap_get(&data, 20), Some(3));

    lay.cimap_remove(&mut data, 10);
    assert_eq!(lay.cimap_get(&data, 10), None);
    assert_eq!(lay.cimap_get(&data, 20), Some(3));
    assert_eq!(lay.cimap_get(&data, 30), Some(0));

    // null children are ignored.
    lay.cimap_put(&mut data, REC_NULL, 7);
    assert_eq!(lay.cimap_get(&data, REC_NULL), Some(0));
}

#[test]
fn test_header_round_trip() {
    let lay = Layout { order: 7, element_size: 16 };
    let header = Header {
        order: 7,
        element_size: 16,
        options: 0x0100_0002,
        root: 3,
        free_list: 9,
        max_recno: 12,
    };
    let mut data = vec![0_u8; lay.node_size()];
    header.encode(&mut data);
    assert_eq!(Header::decode(&data).unwrap(), header);

    // magic is checked.
    data[0] = 0;
    match Header::decode(&data) {
        Err(crate::Error::InvalidFile(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
}
