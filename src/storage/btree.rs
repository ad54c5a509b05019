use std::fs::File;
use std::io;
use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::page::{
    NODE_INTERMEDIATE, NODE_LEAF, NODE_ROOT, NO_PAGE, PageBuf, Subnode, TREE_CAPACITY,
    bin_search, copy_subnode, get_child, get_key, get_key_count, get_node_type, get_offset,
    get_subnode, new_page, set_child, set_key, set_key_count, set_node_type, set_offset,
    shift_insert, shift_remove,
};
use crate::storage::pager::{
    IndexHeader, OpenMode, Pager, STATUS_CONSISTENT, STATUS_INCONSISTENT,
};

/// Result of a recursive insert: either the page absorbed the unit, or it
/// split and one unit must move up into the caller's page.
enum InsertOutcome {
    NoChange,
    Promoted(Subnode),
}

/// How an underfull child was repaired, reported for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebalance {
    Direct,
    Redistributed,
    MergedLeft,
    MergedRight,
}

/// Threaded through the delete recursion. `Take` asks the descent to pull
/// out the leftmost unit of the subtree (the in-order successor); `Took`
/// carries it back up to the non-leaf slot being rewritten.
enum Swap {
    Idle,
    Take,
    Took { key: u32, offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Abort,
}

/// What a traversal visitor decided: keep walking or stop, and whether it
/// wrote through the offset reference (a changed offset makes the owning
/// page persist).
#[derive(Debug, Clone, Copy)]
pub struct VisitOutcome {
    pub walk: Walk,
    pub changed: bool,
}

impl VisitOutcome {
    pub fn unchanged(walk: Walk) -> Self {
        VisitOutcome { walk, changed: false }
    }

    pub fn changed(walk: Walk) -> Self {
        VisitOutcome { walk, changed: true }
    }
}

/// The only hook trigger that exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Close,
}

pub type HookFn = Box<dyn FnMut(&mut File) -> io::Result<()>>;

/// A B-tree mapping unique u32 keys to u64 byte offsets in an external
/// record file, kept entirely in one page-structured index file.
///
/// The root page is the only page buffered across calls; it is written back
/// when it goes dirty and the root identity changes, and at close. Every
/// other page is read fresh and written immediately, so a completed call
/// leaves nothing volatile but the root and the in-memory header.
pub struct BTree {
    pager: Pager,
    header: IndexHeader,

    /// Cached content of the root page (or of the latent page 0 while the
    /// tree is still empty and the header root is -1).
    root: PageBuf,
    root_dirty: bool,

    hooks: Vec<(HookEvent, HookFn)>,
}

impl BTree {
    /// Open (or, in write mode, create) the index file at `path`.
    ///
    /// Read-only open fails on a missing or invalid header. Any open fails
    /// if the status byte says a previous session did not close cleanly.
    /// Write-mode open persists the inconsistent status before anything
    /// else, so a crash from here on is detectable on the next open.
    pub fn open(path: &Path, mode: OpenMode) -> DbResult<BTree> {
        let mut pager = Pager::open(path, mode)?;

        let header = match pager.read_header() {
            Ok(header) => {
                if header.status == STATUS_INCONSISTENT {
                    return Err(DbError::Inconsistent);
                }
                header
            }
            Err(DbError::InvalidHeader) if mode == OpenMode::ReadWrite => {
                debug!("open: no header, initializing empty tree");
                let header = IndexHeader::fresh();
                pager.write_header(&header)?;
                pager.write_page(0, &new_page())?;

                return Ok(BTree {
                    pager,
                    header,
                    root: new_page(),
                    root_dirty: false,
                    hooks: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let mut header = header;
        if mode == OpenMode::ReadWrite {
            header.status = STATUS_INCONSISTENT;
            pager.write_header(&header)?;
        }

        // The latent root of a tree that was closed empty lives at page 0.
        let root_rrn = if header.root == NO_PAGE { 0 } else { header.root as u32 };
        let mut root = new_page();
        pager.read_page(root_rrn, &mut root)?;

        debug!(
            "open: root={} pages={} next={}",
            header.root, header.page_count, header.next
        );

        Ok(BTree { pager, header, root, root_dirty: false, hooks: Vec::new() })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Flush the cached root, restore the consistent status (write mode),
    /// then run close hooks against the flushed file, most recently
    /// registered first.
    pub fn close(mut self) -> DbResult<()> {
        self.flush_root()?;

        if self.pager.writable() {
            self.header.status = STATUS_CONSISTENT;
            self.pager.write_header(&self.header)?;
        }

        let mut hooks = std::mem::take(&mut self.hooks);
        for (event, hook) in hooks.iter_mut().rev() {
            match event {
                HookEvent::Close => hook(self.pager.file_mut())?,
            }
        }

        Ok(())
    }

    pub fn add_hook(
        &mut self,
        event: HookEvent,
        hook: impl FnMut(&mut File) -> io::Result<()> + 'static,
    ) {
        self.hooks.push((event, Box::new(hook)));
    }

    pub fn add_close_hook(&mut self, hook: impl FnMut(&mut File) -> io::Result<()> + 'static) {
        self.add_hook(HookEvent::Close, hook);
    }

    /// Look `key` up, returning the record offset it maps to.
    pub fn search(&mut self, key: u32) -> DbResult<Option<u64>> {
        if self.header.root == NO_PAGE {
            return Ok(None);
        }
        self.search_rec(self.header.root as u32, key)
    }

    fn search_rec(&mut self, rrn: u32, key: u32) -> DbResult<Option<u64>> {
        let page = self.load_page(rrn)?;
        let (slot, found) = bin_search(&page, key);

        if found {
            return Ok(Some(get_offset(&page, slot)));
        }

        let child = get_child(&page, slot);
        if child == NO_PAGE {
            return Ok(None);
        }
        self.search_rec(child as u32, key)
    }

    /// Insert `key -> offset`. An existing key has its offset overwritten
    /// in place; a new key may split pages all the way up, and a promotion
    /// escaping the root grows the tree by one level.
    pub fn insert(&mut self, key: u32, offset: u64) -> DbResult<()> {
        if !self.pager.writable() {
            return Err(DbError::ReadOnly);
        }

        if self.header.root == NO_PAGE {
            // First insert claims the preallocated empty leaf as the root.
            self.header.root = 0;
            self.pager.write_header(&self.header)?;
        }

        debug!("insert: key={} offset={}", key, offset);
        match self.insert_rec(self.header.root as u32, key, offset)? {
            InsertOutcome::NoChange => Ok(()),
            InsertOutcome::Promoted(sub) => {
                let new_rrn = self.alloc_page()?;
                let mut page = new_page();
                set_node_type(&mut page, NODE_ROOT);
                shift_insert(&mut page, 0, &sub);

                debug!("insert: height grows, new root rrn={}", new_rrn);
                self.flush_root()?;
                self.header.root = new_rrn as i32;
                self.root = page;
                self.root_dirty = true;
                self.pager.write_header(&self.header)?;
                Ok(())
            }
        }
    }

    fn insert_rec(&mut self, rrn: u32, key: u32, offset: u64) -> DbResult<InsertOutcome> {
        let mut page = self.load_page(rrn)?;
        let (slot, found) = bin_search(&page, key);

        if found {
            // Upsert: no structural change, whatever the node kind.
            set_offset(&mut page, slot, offset);
            self.store_page(rrn, &page)?;
            return Ok(InsertOutcome::NoChange);
        }

        let child = get_child(&page, slot);
        if child == NO_PAGE {
            let sub = Subnode { left: NO_PAGE, key, offset, right: NO_PAGE };
            return self.place(rrn, page, slot, sub);
        }

        match self.insert_rec(child as u32, key, offset)? {
            InsertOutcome::NoChange => Ok(InsertOutcome::NoChange),
            InsertOutcome::Promoted(sub) => self.place(rrn, page, slot, sub),
        }
    }

    /// Put `sub` into `page` at `slot`: shift-insert when there is room,
    /// split otherwise.
    fn place(
        &mut self,
        rrn: u32,
        mut page: PageBuf,
        slot: usize,
        sub: Subnode,
    ) -> DbResult<InsertOutcome> {
        if get_key_count(&page) < TREE_CAPACITY {
            shift_insert(&mut page, slot, &sub);
            self.store_page(rrn, &page)?;
            return Ok(InsertOutcome::NoChange);
        }

        let promoted = self.split(rrn, &mut page, slot, sub)?;
        Ok(InsertOutcome::Promoted(promoted))
    }

    /// Split the full `page` that should receive `sub` at `insert_at`.
    ///
    /// Of the N + 1 conceptual units, the left page keeps ⌈(N-1)/2⌉, one is
    /// promoted, and the rest land in a freshly allocated right sibling.
    /// The promoted unit leaves with the two half pages as its children.
    fn split(
        &mut self,
        rrn: u32,
        page: &mut PageBuf,
        insert_at: usize,
        sub: Subnode,
    ) -> DbResult<Subnode> {
        let new_rrn = self.alloc_page()?;
        let mut sibling = new_page();

        let node_type = get_node_type(page);
        if node_type == NODE_LEAF {
            set_node_type(&mut sibling, NODE_LEAF);
        } else {
            set_node_type(&mut sibling, NODE_INTERMEDIATE);
            if node_type == NODE_ROOT {
                set_node_type(page, NODE_INTERMEDIATE);
            }
        }

        let n = TREE_CAPACITY;
        let keep = (n - 1).div_ceil(2);

        let promoted = if insert_at < keep {
            // New unit stays left: promote the unit just past the kept
            // prefix, hand the right half to the sibling, then shift the
            // new unit into the shrunk page.
            let promoted = get_subnode(page, keep - 1);
            for (dst, src) in (keep..n).enumerate() {
                copy_subnode(&mut sibling, dst, page, src);
            }
            set_key_count(&mut sibling, n - keep);
            set_key_count(page, keep - 1);
            shift_insert(page, insert_at, &sub);
            promoted
        } else if insert_at == keep {
            // The new unit itself is promoted; its lower-split children
            // straddle the cut, so the sibling's leading child is rewired.
            for (dst, src) in (keep..n).enumerate() {
                copy_subnode(&mut sibling, dst, page, src);
            }
            set_key_count(&mut sibling, n - keep);
            set_child(&mut sibling, 0, sub.right);
            set_key_count(page, keep);
            sub
        } else {
            // New unit lands right: promote the first right-half unit and
            // copy the rest in one pass that skips a gap for the new unit.
            let promoted = get_subnode(page, keep);
            let gap = insert_at - keep - 1;
            let mut dst = 0;
            for src in keep + 1..n {
                if dst == gap {
                    dst += 1;
                }
                copy_subnode(&mut sibling, dst, page, src);
                dst += 1;
            }
            set_child(&mut sibling, gap, sub.left);
            set_key(&mut sibling, gap, sub.key);
            set_offset(&mut sibling, gap, sub.offset);
            set_child(&mut sibling, gap + 1, sub.right);
            set_key_count(&mut sibling, n - keep);
            set_key_count(page, keep);
            promoted
        };

        debug!(
            "split: rrn={} sibling={} promoted key={}",
            rrn, new_rrn, promoted.key
        );

        self.pager.write_page(new_rrn, &sibling)?;
        self.store_page(rrn, page)?;

        Ok(Subnode {
            left: rrn as i32,
            key: promoted.key,
            offset: promoted.offset,
            right: new_rrn as i32,
        })
    }

    /// Remove `key`. Returns whether the key was present; removing an
    /// absent key touches nothing.
    pub fn remove(&mut self, key: u32) -> DbResult<bool> {
        if !self.pager.writable() {
            return Err(DbError::ReadOnly);
        }
        if self.header.root == NO_PAGE {
            return Ok(false);
        }

        debug!("remove: key={}", key);
        let mut swap = Swap::Idle;
        if !self.remove_rec(self.header.root as u32, key, &mut swap)? {
            return Ok(false);
        }

        // A merge that consumed the root's last separator leaves it with a
        // single child: collapse one level. A leaf root is never collapsed
        // further; an empty leaf root *is* the empty tree.
        if get_node_type(&self.root) != NODE_LEAF && get_key_count(&self.root) == 0 {
            let child = get_child(&self.root, 0);
            if child != NO_PAGE {
                let old_rrn = self.header.root as u32;
                let mut page = self.load_page(child as u32)?;
                if get_node_type(&page) != NODE_LEAF {
                    set_node_type(&mut page, NODE_ROOT);
                }

                debug!("remove: root collapse, {} -> {}", old_rrn, child);
                self.pager.write_page(old_rrn, &new_page())?;
                self.header.root = child;
                self.header.page_count -= 1;
                self.root = page;
                self.root_dirty = true;
                self.pager.write_header(&self.header)?;
            }
        }

        Ok(true)
    }

    fn remove_rec(&mut self, rrn: u32, key: u32, swap: &mut Swap) -> DbResult<bool> {
        let mut page = self.load_page(rrn)?;
        let leaf = get_node_type(&page) == NODE_LEAF;

        if let Swap::Take = swap {
            // Pulling the in-order successor: keep left, take the leftmost
            // unit once a leaf is reached.
            if leaf {
                *swap = Swap::Took {
                    key: get_key(&page, 0),
                    offset: get_offset(&page, 0),
                };
                shift_remove(&mut page, 0);
                self.store_page(rrn, &page)?;
                return Ok(true);
            }

            let child = get_child(&page, 0);
            self.remove_rec(child as u32, key, swap)?;
            self.rebalance_child(&mut page, 0)?;
            self.store_page(rrn, &page)?;
            return Ok(true);
        }

        let (slot, found) = bin_search(&page, key);

        if leaf {
            if !found {
                return Ok(false);
            }
            shift_remove(&mut page, slot);
            self.store_page(rrn, &page)?;
            return Ok(true);
        }

        if found {
            // The key lives in a non-leaf page: swap it with its in-order
            // successor and do the physical removal down in a leaf. The
            // slot must be rewritten before rebalancing, since a merge
            // demotes exactly this separator.
            *swap = Swap::Take;
            let child = get_child(&page, slot + 1);
            self.remove_rec(child as u32, key, swap)?;
            if let Swap::Took { key: succ_key, offset: succ_offset } = *swap {
                set_key(&mut page, slot, succ_key);
                set_offset(&mut page, slot, succ_offset);
            }
            *swap = Swap::Idle;
            self.rebalance_child(&mut page, slot + 1)?;
            self.store_page(rrn, &page)?;
            return Ok(true);
        }

        let child = get_child(&page, slot);
        if child == NO_PAGE {
            return Ok(false);
        }

        let found = self.remove_rec(child as u32, key, swap)?;
        if found {
            self.rebalance_child(&mut page, slot)?;
            self.store_page(rrn, &page)?;
        }
        Ok(found)
    }

    /// Repair the child at `child_idx` of `parent` if a removal below left
    /// it under the minimum occupancy. The sibling inspected is the right
    /// one, or the left one when the child is the rightmost. The caller
    /// persists `parent` afterwards.
    fn rebalance_child(&mut self, parent: &mut PageBuf, child_idx: usize) -> DbResult<Rebalance> {
        let child_rrn = get_child(parent, child_idx) as u32;
        let child = self.load_page(child_rrn)?;
        let min = min_keys(&child);

        if get_key_count(&child) >= min {
            return Ok(Rebalance::Direct);
        }

        let siblings_right = child_idx < get_key_count(parent);
        let left_idx = if siblings_right { child_idx } else { child_idx - 1 };
        let sep = left_idx;

        let left_rrn = get_child(parent, left_idx) as u32;
        let right_rrn = get_child(parent, left_idx + 1) as u32;
        let mut left = if left_rrn == child_rrn { child } else { self.load_page(left_rrn)? };
        let mut right = if right_rrn == child_rrn { child } else { self.load_page(right_rrn)? };

        let lc = get_key_count(&left);
        let rc = get_key_count(&right);

        if lc + rc >= 2 * min {
            redistribute(parent, sep, &mut left, &mut right);
            debug!(
                "rebalance: redistributed {} <-> {} via slot {}",
                left_rrn, right_rrn, sep
            );
            self.store_page(left_rrn, &left)?;
            self.store_page(right_rrn, &right)?;
            return Ok(Rebalance::Redistributed);
        }

        // Concatenate: right sibling folds into the left one, taking the
        // parent separator with it. The emptied page is written back blank;
        // its number is never handed out again.
        set_key(&mut left, lc, get_key(parent, sep));
        set_offset(&mut left, lc, get_offset(parent, sep));
        set_child(&mut left, lc + 1, get_child(&right, 0));
        for i in 0..rc {
            copy_subnode(&mut left, lc + 1 + i, &right, i);
        }
        set_key_count(&mut left, lc + 1 + rc);
        shift_remove(parent, sep);

        debug!("rebalance: merged {} into {}", right_rrn, left_rrn);
        self.store_page(left_rrn, &left)?;
        self.pager.write_page(right_rrn, &new_page())?;
        self.header.page_count -= 1;
        self.pager.write_header(&self.header)?;

        Ok(if siblings_right { Rebalance::MergedRight } else { Rebalance::MergedLeft })
    }

    /// In-order walk. The visitor sees each key with a mutable reference
    /// to its offset; reporting a change persists the owning page, and
    /// `Walk::Abort` stops the walk right there.
    pub fn traverse<F>(&mut self, mut visit: F) -> DbResult<()>
    where
        F: FnMut(u32, &mut u64) -> VisitOutcome,
    {
        if self.header.root == NO_PAGE {
            return Ok(());
        }
        self.traverse_rec(self.header.root as u32, &mut visit)?;
        Ok(())
    }

    fn traverse_rec(
        &mut self,
        rrn: u32,
        visit: &mut dyn FnMut(u32, &mut u64) -> VisitOutcome,
    ) -> DbResult<Walk> {
        let mut page = self.load_page(rrn)?;
        let count = get_key_count(&page);
        let mut dirty = false;
        let mut walk = Walk::Continue;

        for slot in 0..count {
            let child = get_child(&page, slot);
            if child != NO_PAGE && self.traverse_rec(child as u32, visit)? == Walk::Abort {
                walk = Walk::Abort;
                break;
            }

            let mut offset = get_offset(&page, slot);
            let outcome = visit(get_key(&page, slot), &mut offset);
            if outcome.changed {
                set_offset(&mut page, slot, offset);
                dirty = true;
            }
            if outcome.walk == Walk::Abort {
                walk = Walk::Abort;
                break;
            }
        }

        if walk == Walk::Continue {
            let child = get_child(&page, count);
            if child != NO_PAGE {
                walk = self.traverse_rec(child as u32, visit)?;
            }
        }

        if dirty {
            self.store_page(rrn, &page)?;
        }
        Ok(walk)
    }

    /// Hand out the next page number. Numbers only ever grow; merged-away
    /// pages are not recycled.
    fn alloc_page(&mut self) -> DbResult<u32> {
        let rrn = self.header.next;
        self.header.next += 1;
        self.header.page_count += 1;
        self.pager.write_header(&self.header)?;
        Ok(rrn)
    }

    /// Resolve a page number against the cached root, reading from disk
    /// only for non-root pages.
    fn load_page(&mut self, rrn: u32) -> DbResult<PageBuf> {
        if self.header.root == rrn as i32 {
            return Ok(self.root);
        }
        let mut page = new_page();
        self.pager.read_page(rrn, &mut page)?;
        Ok(page)
    }

    /// Counterpart of `load_page`: the root goes dirty in the cache, any
    /// other page is written through immediately.
    fn store_page(&mut self, rrn: u32, page: &PageBuf) -> DbResult<()> {
        if self.header.root == rrn as i32 {
            self.root = *page;
            self.root_dirty = true;
            return Ok(());
        }
        self.pager.write_page(rrn, page)?;
        Ok(())
    }

    fn flush_root(&mut self) -> DbResult<()> {
        if self.root_dirty && self.header.root != NO_PAGE {
            self.pager.write_page(self.header.root as u32, &self.root)?;
            self.root_dirty = false;
        }
        Ok(())
    }
}

fn min_keys(page: &PageBuf) -> usize {
    if get_node_type(page) == NODE_LEAF {
        TREE_CAPACITY.div_ceil(2)
    } else {
        TREE_CAPACITY / 2
    }
}

/// Move units between two siblings through their parent separator until
/// the counts even out: ⌊diff/2⌋ units cross, plus one more when the
/// combined count is odd. Whichever unit crosses last becomes the new
/// separator.
fn redistribute(parent: &mut PageBuf, sep: usize, left: &mut PageBuf, right: &mut PageBuf) {
    let lc = get_key_count(left);
    let rc = get_key_count(right);
    let extra = (lc + rc) % 2;

    if rc > lc {
        let t = (rc - lc) / 2 + extra;

        // Left gains the separator, then the first t - 1 right units; the
        // t-th right unit's key/offset climb into the parent.
        set_key(left, lc, get_key(parent, sep));
        set_offset(left, lc, get_offset(parent, sep));
        set_child(left, lc + 1, get_child(right, 0));
        for i in 0..t - 1 {
            copy_subnode(left, lc + 1 + i, right, i);
        }
        set_key(parent, sep, get_key(right, t - 1));
        set_offset(parent, sep, get_offset(right, t - 1));
        set_key_count(left, lc + t);

        let snapshot = *right;
        for i in 0..rc - t {
            copy_subnode(right, i, &snapshot, i + t);
        }
        if rc - t == 0 {
            set_child(right, 0, get_child(&snapshot, t));
        }
        set_key_count(right, rc - t);
    } else {
        let t = (lc - rc) / 2 + extra;

        // Shift the right page over, then pull the separator and the last
        // t - 1 left units into the opened space.
        let snapshot = *right;
        for i in (0..rc).rev() {
            copy_subnode(right, i + t, &snapshot, i);
        }
        if rc == 0 {
            set_child(right, t, get_child(&snapshot, 0));
        }
        for i in 0..t - 1 {
            copy_subnode(right, i, left, lc - t + 1 + i);
        }
        set_key(right, t - 1, get_key(parent, sep));
        set_offset(right, t - 1, get_offset(parent, sep));
        if t == 1 {
            set_child(right, 0, get_child(left, lc));
        }
        set_key(parent, sep, get_key(left, lc - t));
        set_offset(parent, sep, get_offset(left, lc - t));
        set_key_count(left, lc - t);
        set_key_count(right, rc + t);
    }
}
