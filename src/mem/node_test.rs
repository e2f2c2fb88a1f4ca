use super::*;

#[test]
fn test_node_id() {
    assert!(NodeId::NULL.is_null());
    assert!(!NodeId::new(0).is_null());
    assert_eq!(NodeId::new(42).off(), 42);
    assert_eq!(NodeId::default(), NodeId::NULL);
    assert_eq!(format!("{:?}", NodeId::NULL), "NodeId(null)");
    assert_eq!(format!("{:?}", NodeId::new(7)), "NodeId(7)");
}

#[test]
fn test_node_new() {
    let node: Node<u64> = Node::new(5);
    assert_eq!(node.fill(), 0);
    assert!(node.is_leaf());
    assert_eq!(node.links.len(), 1);
    assert!(node.parent.is_null());
}

#[test]
fn test_reset_offsets() {
    let mut node: Node<u64> = Node::new(5);
    node.elements = vec![10, 20, 30];
    node.links = vec![Link::default(); 4];
    node.links[0].count = 2;
    node.links[1].count = 0;
    node.links[2].count = 5;
    node.links[3].count = 1;

    let total = node.reset_offsets();
    assert_eq!(total, 3 + 2 + 5 + 1);
    assert_eq!(node.links[0].offset, 0);
    assert_eq!(node.links[1].offset, 3);
    assert_eq!(node.links[2].offset, 4);
    assert_eq!(node.links[3].offset, 10);
}

#[test]
fn test_node_reset() {
    let mut node: Node<u64> = Node::new(4);
    node.elements = vec![1, 2, 3];
    node.links = vec![Link::default(); 4];
    node.parent = NodeId::new(9);
    node.child_index = 2;

    node.reset();
    assert_eq!(node.fill(), 0);
    assert_eq!(node.links.len(), 1);
    assert!(node.parent.is_null());
    assert_eq!(node.child_index, 0);
}
