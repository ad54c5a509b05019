// ┌────────────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                          │
// │────────┼────────┼──────────────────────────────────────────────────────│
// │   0    │   4    │ NODE_TYPE (i32: -1 = leaf, 0 = root, 1 = interm.)    │
// │   4    │   4    │ KEY_COUNT (u32)                                      │
// │   8    │   4    │ CHILD 0 (i32 page number, -1 = none)                 │
// │  12    │  16    │ KEY 0 (u32) │ OFFSET 0 (u64) │ CHILD 1 (i32)         │
// │  28    │  16    │ KEY 1 (u32) │ OFFSET 1 (u64) │ CHILD 2 (i32)         │
// │  ...   │  ...   │ '$' filler up to PAGE_SIZE                           │
// └────────────────────────────────────────────────────────────────────────┘
//
// A "subnode" is the (left child, key, offset, right child) view of one
// slot. Subnodes overlap on disk: the right child of slot `s` and the left
// child of slot `s + 1` are the same field. `Subnode` is only an in-memory
// convenience; the page itself stores each child exactly once.

pub const PAGE_SIZE: usize = 44;

pub const NODE_TYPE_OFFSET: usize = 0; // 4 bytes (i32)
pub const KEY_COUNT_OFFSET: usize = 4; // 4 bytes (u32)
pub const NODE_HEADER_SIZE: usize = 8;

pub const CHILD_SIZE: usize = 4;
/// Bytes from one subnode to the next: key + offset + shared child.
pub const SUBNODE_SKIP: usize = 16;

/// How many keys fit in one page. PAGE_SIZE = 44 gives 2, i.e. an order-3 tree.
pub const TREE_CAPACITY: usize = (PAGE_SIZE - NODE_HEADER_SIZE - CHILD_SIZE) / SUBNODE_SKIP;

/// First byte past the last child field; everything from here on is filler.
pub const PAGE_USED: usize = NODE_HEADER_SIZE + CHILD_SIZE + TREE_CAPACITY * SUBNODE_SKIP;

pub const NODE_LEAF: i32 = -1;
pub const NODE_ROOT: i32 = 0;
pub const NODE_INTERMEDIATE: i32 = 1;

/// Sentinel page number for "no child" / "no root".
pub const NO_PAGE: i32 = -1;

/// Filler byte for the unused tail of a page (and of the header page).
pub const FILLER: u8 = b'$';

pub type PageBuf = [u8; PAGE_SIZE];

/// One slot of a page, materialized from the overlapping child fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnode {
    pub left: i32,
    pub key: u32,
    pub offset: u64,
    pub right: i32,
}

fn child_pos(slot: usize) -> usize {
    NODE_HEADER_SIZE + slot * SUBNODE_SKIP
}

fn key_pos(slot: usize) -> usize {
    NODE_HEADER_SIZE + CHILD_SIZE + slot * SUBNODE_SKIP
}

fn offset_pos(slot: usize) -> usize {
    key_pos(slot) + 4
}

pub fn get_node_type(page: &PageBuf) -> i32 {
    i32::from_le_bytes(page[NODE_TYPE_OFFSET..NODE_TYPE_OFFSET + 4].try_into().unwrap())
}

pub fn set_node_type(page: &mut PageBuf, node_type: i32) {
    page[NODE_TYPE_OFFSET..NODE_TYPE_OFFSET + 4].copy_from_slice(&node_type.to_le_bytes());
}

pub fn get_key_count(page: &PageBuf) -> usize {
    u32::from_le_bytes(page[KEY_COUNT_OFFSET..KEY_COUNT_OFFSET + 4].try_into().unwrap()) as usize
}

pub fn set_key_count(page: &mut PageBuf, count: usize) {
    page[KEY_COUNT_OFFSET..KEY_COUNT_OFFSET + 4]
        .copy_from_slice(&(count as u32).to_le_bytes());
}

/// Child `slot` is the left child of slot `slot` and, equally, the right
/// child of slot `slot - 1`. Valid for `slot` in `0..=key_count`.
pub fn get_child(page: &PageBuf, slot: usize) -> i32 {
    let pos = child_pos(slot);
    i32::from_le_bytes(page[pos..pos + 4].try_into().unwrap())
}

pub fn set_child(page: &mut PageBuf, slot: usize, child: i32) {
    let pos = child_pos(slot);
    page[pos..pos + 4].copy_from_slice(&child.to_le_bytes());
}

pub fn get_key(page: &PageBuf, slot: usize) -> u32 {
    let pos = key_pos(slot);
    u32::from_le_bytes(page[pos..pos + 4].try_into().unwrap())
}

pub fn set_key(page: &mut PageBuf, slot: usize, key: u32) {
    let pos = key_pos(slot);
    page[pos..pos + 4].copy_from_slice(&key.to_le_bytes());
}

pub fn get_offset(page: &PageBuf, slot: usize) -> u64 {
    let pos = offset_pos(slot);
    u64::from_le_bytes(page[pos..pos + 8].try_into().unwrap())
}

pub fn set_offset(page: &mut PageBuf, slot: usize, offset: u64) {
    let pos = offset_pos(slot);
    page[pos..pos + 8].copy_from_slice(&offset.to_le_bytes());
}

pub fn get_subnode(page: &PageBuf, slot: usize) -> Subnode {
    Subnode {
        left: get_child(page, slot),
        key: get_key(page, slot),
        offset: get_offset(page, slot),
        right: get_child(page, slot + 1),
    }
}

/// Copy one full subnode (both child fields included) between slots,
/// possibly within the same page via a detached source copy.
pub fn copy_subnode(dst: &mut PageBuf, dst_slot: usize, src: &PageBuf, src_slot: usize) {
    let sub = get_subnode(src, src_slot);
    set_child(dst, dst_slot, sub.left);
    set_key(dst, dst_slot, sub.key);
    set_offset(dst, dst_slot, sub.offset);
    set_child(dst, dst_slot + 1, sub.right);
}

/// Blank a page: leaf type, zero keys, every child `-1`, tail filled with '$'.
pub fn init_page(page: &mut PageBuf) {
    set_node_type(page, NODE_LEAF);
    set_key_count(page, 0);
    for slot in 0..=TREE_CAPACITY {
        set_child(page, slot, NO_PAGE);
    }
    for byte in &mut page[PAGE_USED..] {
        *byte = FILLER;
    }
    // Key/offset fields of unused slots carry no meaning; blank them anyway
    // so a fresh page is byte-for-byte reproducible.
    for slot in 0..TREE_CAPACITY {
        set_key(page, slot, 0);
        set_offset(page, slot, 0);
    }
}

pub fn new_page() -> PageBuf {
    let mut page = [0u8; PAGE_SIZE];
    init_page(&mut page);
    page
}

/// Binary search over the closed-open interval `[0, key_count)`.
///
/// Returns `(slot, true)` when `key` sits at `slot`, and `(slot, false)`
/// with `slot` being the exact insertion point otherwise. The insertion
/// point may equal `key_count`; `get_child(page, slot)` is still valid
/// there, yielding the trailing child, which is what descent and split
/// both rely on.
pub fn bin_search(page: &PageBuf, key: u32) -> (usize, bool) {
    let mut low = 0;
    let mut high = get_key_count(page);

    while low < high {
        let mid = (low + high) / 2;
        let probe = get_key(page, mid);

        if probe < key {
            low = mid + 1;
        } else if probe > key {
            high = mid;
        } else {
            return (mid, true);
        }
    }

    (low, false)
}

/// Insert `sub` at `slot`, shifting slots `[slot, key_count)` one position
/// rightward. Both of the new unit's child fields are written, so a leaf
/// insert passes `-1` on both sides and a promoted-unit insert passes the
/// two half pages. The page must have spare capacity.
pub fn shift_insert(page: &mut PageBuf, slot: usize, sub: &Subnode) {
    let count = get_key_count(page);
    debug_assert!(count < TREE_CAPACITY && slot <= count);

    let snapshot = *page;
    for s in (slot..count).rev() {
        copy_subnode(page, s + 1, &snapshot, s);
    }

    set_child(page, slot, sub.left);
    set_key(page, slot, sub.key);
    set_offset(page, slot, sub.offset);
    set_child(page, slot + 1, sub.right);
    set_key_count(page, count + 1);
}

/// Remove the key/offset at `slot` together with its *right* child,
/// shifting slots `[slot + 1, key_count)` one position leftward. Removing
/// the right child is what both leaf removal (all children `-1`) and
/// merge demotion (the dropped child is the emptied right sibling) need.
pub fn shift_remove(page: &mut PageBuf, slot: usize) {
    let count = get_key_count(page);
    debug_assert!(slot < count);

    let snapshot = *page;
    for s in slot + 1..count {
        set_key(page, s - 1, get_key(&snapshot, s));
        set_offset(page, s - 1, get_offset(&snapshot, s));
        set_child(page, s, get_child(&snapshot, s + 1));
    }
    set_key_count(page, count - 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_sub(key: u32, offset: u64) -> Subnode {
        Subnode { left: NO_PAGE, key, offset, right: NO_PAGE }
    }

    #[test]
    fn fresh_page_layout() {
        let page = new_page();
        assert_eq!(get_node_type(&page), NODE_LEAF);
        assert_eq!(get_key_count(&page), 0);
        for slot in 0..=TREE_CAPACITY {
            assert_eq!(get_child(&page, slot), NO_PAGE);
        }
        for &byte in &page[PAGE_USED..] {
            assert_eq!(byte, FILLER);
        }
    }

    #[test]
    fn capacity_matches_order_three() {
        assert_eq!(TREE_CAPACITY, 2);
    }

    #[test]
    fn bin_search_finds_and_places() {
        let mut page = new_page();
        shift_insert(&mut page, 0, &leaf_sub(10, 100));
        shift_insert(&mut page, 1, &leaf_sub(30, 300));

        assert_eq!(bin_search(&page, 10), (0, true));
        assert_eq!(bin_search(&page, 30), (1, true));
        assert_eq!(bin_search(&page, 5), (0, false));
        assert_eq!(bin_search(&page, 20), (1, false));
        // Insertion point past the last key is valid and expected.
        assert_eq!(bin_search(&page, 40), (2, false));
    }

    #[test]
    fn shift_insert_keeps_order_and_children() {
        let mut page = new_page();
        set_node_type(&mut page, NODE_ROOT);
        shift_insert(&mut page, 0, &Subnode { left: 3, key: 50, offset: 500, right: 4 });
        shift_insert(&mut page, 0, &Subnode { left: 1, key: 20, offset: 200, right: 3 });

        assert_eq!(get_key(&page, 0), 20);
        assert_eq!(get_key(&page, 1), 50);
        assert_eq!(get_offset(&page, 1), 500);
        // Shared field: right child of slot 0 is left child of slot 1.
        assert_eq!(get_child(&page, 0), 1);
        assert_eq!(get_child(&page, 1), 3);
        assert_eq!(get_child(&page, 2), 4);
    }

    #[test]
    fn shift_remove_drops_right_child() {
        let mut page = new_page();
        set_node_type(&mut page, NODE_ROOT);
        shift_insert(&mut page, 0, &Subnode { left: 1, key: 20, offset: 200, right: 3 });
        shift_insert(&mut page, 1, &Subnode { left: 3, key: 50, offset: 500, right: 4 });

        shift_remove(&mut page, 0);
        assert_eq!(get_key_count(&page), 1);
        assert_eq!(get_key(&page, 0), 50);
        // Child 1 (page 3) went away with key 20; children 1 and 4 remain.
        assert_eq!(get_child(&page, 0), 1);
        assert_eq!(get_child(&page, 1), 4);
    }
}
