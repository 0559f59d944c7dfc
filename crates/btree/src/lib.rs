//! A clustered B+-tree index over fixed-width composite keys, stored as
//! pages behind a shared [`buffer::BufferPoolManager`]. Keys are unique; a
//! duplicate insert is reported to the caller rather than silently
//! overwritten.
//!
//! Every tree's root page id lives in the disk layer's index-roots page, so
//! a tree can rediscover its own root after a reopen without the catalog
//! tracking anything beyond the index id.

pub mod iterator;
pub mod key;
pub mod node;

pub use iterator::IndexIterator;
pub use key::KeySchema;

use buffer::SharedBufferPool;
use common::{DbError, DbResult, PageId, RecordId};
use node::{InternalPage, LeafPage};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use types::Value;

/// A B+-tree index identified by `index_id`, sharing a buffer pool with the
/// table heap and catalog it's attached to.
pub struct BPlusTree {
    index_id: u32,
    pool: SharedBufferPool,
    key_schema: KeySchema,
    leaf_max_size: u32,
    internal_max_size: u32,
    root_page_id: AtomicI32,
}

impl BPlusTree {
    /// Opens (or, for a fresh index, prepares to lazily create) the tree for
    /// `index_id`, reading its root page id from the disk layer's
    /// index-roots page if one was already recorded.
    #[tracing::instrument(skip(pool, key_schema))]
    pub fn new(index_id: u32, pool: SharedBufferPool, key_schema: KeySchema) -> DbResult<Self> {
        let key_len = key_schema.byte_len();
        let root = {
            let guard = pool.lock().expect("buffer pool mutex poisoned");
            guard.disk_manager().read_index_roots()?.get(index_id)
        }
        .unwrap_or(PageId::INVALID);

        Ok(Self {
            index_id,
            pool,
            leaf_max_size: node::leaf_max_entries(key_len),
            internal_max_size: node::internal_max_entries(key_len),
            key_schema,
            root_page_id: AtomicI32::new(root.0),
        })
    }

    pub fn index_id(&self) -> u32 {
        self.index_id
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    pub fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(AtomicOrdering::SeqCst))
    }

    fn key_len(&self) -> usize {
        self.key_schema.byte_len()
    }

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.key_schema
            .compare(a, b)
            .expect("stored index keys must decode under their own schema")
    }

    fn set_root_page_id(&self, new_root: PageId) -> DbResult<()> {
        self.root_page_id.store(new_root.0, AtomicOrdering::SeqCst);
        let disk = {
            let guard = self.pool.lock().expect("buffer pool mutex poisoned");
            guard.disk_manager().clone()
        };
        let mut roots = disk.read_index_roots()?;
        if new_root.is_valid() {
            roots.insert(self.index_id, new_root);
        } else {
            roots.remove(self.index_id);
        }
        disk.write_index_roots(&roots)
    }

    fn set_parent(&self, child: PageId, parent: PageId) -> DbResult<()> {
        let key_len = self.key_len();
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(child)?;
        {
            let buf = guard.page_data_mut(frame);
            if node::page_is_leaf(buf) {
                LeafPage::new(buf, key_len).set_parent_page_id(parent);
            } else {
                InternalPage::new(buf, key_len).set_parent_page_id(parent);
            }
        }
        guard.unpin_page(child, true)
    }

    /// Walks up from `child_id`'s parent chain fixing the first ancestor
    /// separator key that isn't a leftmost-child placeholder to `new_min`.
    /// Called after a removal that took out a leaf's minimum key: every
    /// ancestor whose separator key equals that minimum needs to track the
    /// leaf's new minimum, per the invariant `K_i = min(subtree(P_i))`.
    fn fixup_ancestor_min_key(
        &self,
        mut child_id: PageId,
        mut parent_id: PageId,
        new_min: &[u8],
    ) -> DbResult<()> {
        let key_len = self.key_len();
        loop {
            if !parent_id.is_valid() {
                return Ok(());
            }
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(parent_id)?;
            let (idx, grandparent) = {
                let buf = guard.page_data_mut(frame);
                let internal = InternalPage::new(buf, key_len);
                let idx = internal
                    .children()
                    .position(|c| c == child_id)
                    .expect("node must be a child of its recorded parent");
                (idx, internal.parent_page_id())
            };
            if idx > 0 {
                let buf = guard.page_data_mut(frame);
                InternalPage::new(buf, key_len).set_key_at(idx as u32, new_min);
                guard.unpin_page(parent_id, true)?;
                return Ok(());
            }
            guard.unpin_page(parent_id, false)?;
            drop(guard);
            child_id = parent_id;
            parent_id = grandparent;
        }
    }

    fn find_leaf_page(&self, key_bytes: &[u8]) -> DbResult<PageId> {
        let key_len = self.key_len();
        let mut page_id = self.root_page_id();
        loop {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(page_id)?;
            let buf = guard.page_data_mut(frame);
            if node::page_is_leaf(buf) {
                guard.unpin_page(page_id, false)?;
                return Ok(page_id);
            }
            let internal = InternalPage::new(buf, key_len);
            let idx = internal.lookup(key_bytes, |a, b| self.cmp(a, b));
            let child = internal.value_at(idx);
            guard.unpin_page(page_id, false)?;
            page_id = child;
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn get_value(&self, key: &[Value]) -> DbResult<Option<RecordId>> {
        if self.is_empty() {
            return Ok(None);
        }
        let key_len = self.key_len();
        let key_bytes = self.key_schema.encode(key)?;
        let leaf_id = self.find_leaf_page(&key_bytes)?;

        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(leaf_id)?;
        let buf = guard.page_data_mut(frame);
        let leaf = LeafPage::new(buf, key_len);
        let idx = leaf.lower_bound(&key_bytes, |a, b| self.cmp(a, b));
        let found = idx < leaf.size() && self.cmp(leaf.key_at(idx), &key_bytes) == Ordering::Equal;
        let value = found.then(|| leaf.value_at(idx));
        guard.unpin_page(leaf_id, false)?;
        Ok(value)
    }

    /// Inserts `(key, rid)`. Returns `Ok(false)` without modifying the tree
    /// if `key` is already present (the index is unique).
    #[tracing::instrument(skip(self))]
    pub fn insert(&self, key: &[Value], rid: RecordId) -> DbResult<bool> {
        let key_len = self.key_len();
        let key_bytes = self.key_schema.encode(key)?;

        if self.is_empty() {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let (page_id, frame) = guard.new_page()?;
            {
                let buf = guard.page_data_mut(frame);
                let mut leaf = LeafPage::new(buf, key_len);
                leaf.init(page_id, PageId::INVALID, self.leaf_max_size);
                leaf.insert(&key_bytes, rid, |a, b| self.cmp(a, b));
            }
            guard.unpin_page(page_id, true)?;
            drop(guard);
            self.set_root_page_id(page_id)?;
            return Ok(true);
        }

        let leaf_id = self.find_leaf_page(&key_bytes)?;
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(leaf_id)?;

        let (mut entries, parent_id, max_size) = {
            let buf = guard.page_data_mut(frame);
            let leaf = LeafPage::new(buf, key_len);
            (leaf.all_entries(), leaf.parent_page_id(), leaf.max_size())
        };

        let pos = entries.partition_point(|(k, _)| self.cmp(k, &key_bytes) == Ordering::Less);
        if pos < entries.len() && self.cmp(&entries[pos].0, &key_bytes) == Ordering::Equal {
            guard.unpin_page(leaf_id, false)?;
            return Ok(false);
        }
        entries.insert(pos, (key_bytes, rid));

        if entries.len() as u32 <= max_size {
            let buf = guard.page_data_mut(frame);
            LeafPage::new(buf, key_len).load_entries(&entries);
            guard.unpin_page(leaf_id, true)?;
            return Ok(true);
        }

        let old_next = {
            let buf = guard.page_data_mut(frame);
            LeafPage::new(buf, key_len).next_page_id()
        };

        let mid = entries.len() / 2;
        let left_entries = entries[..mid].to_vec();
        let right_entries = entries[mid..].to_vec();
        let separator = right_entries[0].0.clone();

        let (new_page_id, new_frame) = guard.new_page()?;
        {
            let buf = guard.page_data_mut(new_frame);
            let mut new_leaf = LeafPage::new(buf, key_len);
            new_leaf.init(new_page_id, parent_id, max_size);
            new_leaf.load_entries(&right_entries);
            new_leaf.set_next_page_id(old_next);
        }
        {
            let buf = guard.page_data_mut(frame);
            let mut leaf = LeafPage::new(buf, key_len);
            leaf.load_entries(&left_entries);
            leaf.set_next_page_id(new_page_id);
        }
        guard.unpin_page(leaf_id, true)?;
        guard.unpin_page(new_page_id, true)?;
        drop(guard);

        self.insert_into_parent(leaf_id, &separator, new_page_id, parent_id)?;
        Ok(true)
    }

    fn insert_into_parent(
        &self,
        left: PageId,
        key: &[u8],
        right: PageId,
        parent_id: PageId,
    ) -> DbResult<()> {
        let key_len = self.key_len();

        if !parent_id.is_valid() {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let (root_id, frame) = guard.new_page()?;
            {
                let buf = guard.page_data_mut(frame);
                let mut internal = InternalPage::new(buf, key_len);
                internal.init(root_id, PageId::INVALID, self.internal_max_size);
                internal.populate_new_root(left, key, right);
            }
            guard.unpin_page(root_id, true)?;
            drop(guard);
            self.set_parent(left, root_id)?;
            self.set_parent(right, root_id)?;
            self.set_root_page_id(root_id)?;
            return Ok(());
        }

        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(parent_id)?;
        let (mut entries, max_size, grandparent) = {
            let buf = guard.page_data_mut(frame);
            let internal = InternalPage::new(buf, key_len);
            (
                internal.all_entries(),
                internal.max_size(),
                internal.parent_page_id(),
            )
        };
        let left_idx = entries
            .iter()
            .position(|(_, v)| *v == left)
            .expect("left child must be present in its recorded parent");
        entries.insert(left_idx + 1, (key.to_vec(), right));

        if entries.len() as u32 <= max_size {
            let buf = guard.page_data_mut(frame);
            InternalPage::new(buf, key_len).load_entries(&entries);
            guard.unpin_page(parent_id, true)?;
            return Ok(());
        }

        let mid = entries.len() / 2;
        let left_entries = entries[..mid].to_vec();
        let mut right_entries = entries[mid..].to_vec();
        let up_key = right_entries[0].0.clone();
        right_entries[0].0 = vec![0u8; key_len];

        {
            let buf = guard.page_data_mut(frame);
            InternalPage::new(buf, key_len).load_entries(&left_entries);
        }
        let (new_page_id, new_frame) = guard.new_page()?;
        {
            let buf = guard.page_data_mut(new_frame);
            let mut new_internal = InternalPage::new(buf, key_len);
            new_internal.init(new_page_id, grandparent, max_size);
            new_internal.load_entries(&right_entries);
        }
        guard.unpin_page(parent_id, true)?;
        guard.unpin_page(new_page_id, true)?;
        drop(guard);

        for (_, child) in &right_entries {
            self.set_parent(*child, new_page_id)?;
        }

        self.insert_into_parent(parent_id, &up_key, new_page_id, grandparent)
    }

    /// Removes `key`. Fails with [`DbError::KeyNotFound`] if it isn't
    /// present.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, key: &[Value]) -> DbResult<()> {
        if self.is_empty() {
            return Err(DbError::KeyNotFound("index is empty".into()));
        }
        let key_len = self.key_len();
        let key_bytes = self.key_schema.encode(key)?;
        let leaf_id = self.find_leaf_page(&key_bytes)?;

        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(leaf_id)?;
        let (mut entries, parent_id, max_size) = {
            let buf = guard.page_data_mut(frame);
            let leaf = LeafPage::new(buf, key_len);
            (leaf.all_entries(), leaf.parent_page_id(), leaf.max_size())
        };

        let pos = entries
            .iter()
            .position(|(k, _)| self.cmp(k, &key_bytes) == Ordering::Equal);
        let Some(pos) = pos else {
            guard.unpin_page(leaf_id, false)?;
            return Err(DbError::KeyNotFound(format!("{key:?} not found in index")));
        };
        let removed_min = pos == 0;
        entries.remove(pos);
        let new_min = entries.first().map(|(k, _)| k.clone());
        {
            let buf = guard.page_data_mut(frame);
            LeafPage::new(buf, key_len).load_entries(&entries);
        }
        guard.unpin_page(leaf_id, true)?;
        drop(guard);

        if removed_min {
            if let Some(new_min) = new_min {
                self.fixup_ancestor_min_key(leaf_id, parent_id, &new_min)?;
            }
        }

        self.coalesce_or_redistribute_leaf(leaf_id, parent_id, max_size)
    }

    fn coalesce_or_redistribute_leaf(
        &self,
        page_id: PageId,
        parent_id: PageId,
        leaf_max_size: u32,
    ) -> DbResult<()> {
        let key_len = self.key_len();
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(page_id)?;
        let size = {
            let buf = guard.page_data_mut(frame);
            LeafPage::new(buf, key_len).size()
        };

        if !parent_id.is_valid() {
            guard.unpin_page(page_id, false)?;
            if size == 0 {
                guard.delete_page(page_id)?;
                drop(guard);
                self.set_root_page_id(PageId::INVALID)?;
            }
            return Ok(());
        }

        let min_size = leaf_max_size.div_ceil(2);
        if size >= min_size {
            guard.unpin_page(page_id, false)?;
            return Ok(());
        }

        let pframe = guard.fetch_page(parent_id)?;
        let (parent_entries, grandparent, parent_max) = {
            let buf = guard.page_data_mut(pframe);
            let internal = InternalPage::new(buf, key_len);
            (
                internal.all_entries(),
                internal.parent_page_id(),
                internal.max_size(),
            )
        };
        let idx = parent_entries
            .iter()
            .position(|(_, v)| *v == page_id)
            .expect("node must be a child of its recorded parent");

        let use_left = idx > 0;
        let sibling_id = if use_left {
            parent_entries[idx - 1].1
        } else {
            parent_entries[idx + 1].1
        };

        let sframe = guard.fetch_page(sibling_id)?;
        let sibling_entries = {
            let buf = guard.page_data_mut(sframe);
            LeafPage::new(buf, key_len).all_entries()
        };
        let self_entries = {
            let buf = guard.page_data_mut(frame);
            LeafPage::new(buf, key_len).all_entries()
        };

        let sibling_min_size = leaf_max_size.div_ceil(2);
        if sibling_entries.len() as u32 > sibling_min_size {
            // The sibling has spare entries: redistribute one across the
            // separator rather than merging.
            if use_left {
                let (borrow_key, borrow_val) = sibling_entries.last().unwrap().clone();
                let mut new_self = self_entries.clone();
                new_self.insert(0, (borrow_key.clone(), borrow_val));
                let mut new_sibling = sibling_entries.clone();
                new_sibling.pop();

                {
                    let buf = guard.page_data_mut(sframe);
                    LeafPage::new(buf, key_len).load_entries(&new_sibling);
                }
                {
                    let buf = guard.page_data_mut(frame);
                    LeafPage::new(buf, key_len).load_entries(&new_self);
                }
                {
                    let buf = guard.page_data_mut(pframe);
                    InternalPage::new(buf, key_len).set_key_at(idx as u32, &borrow_key);
                }
                guard.unpin_page(sibling_id, true)?;
                guard.unpin_page(page_id, true)?;
                guard.unpin_page(parent_id, true)?;
                Ok(())
            } else {
                let (borrow_key, borrow_val) = sibling_entries.first().unwrap().clone();
                let mut new_self = self_entries.clone();
                new_self.push((borrow_key, borrow_val));
                let mut new_sibling = sibling_entries.clone();
                new_sibling.remove(0);
                let new_separator = new_sibling
                    .first()
                    .map(|(k, _)| k.clone())
                    .unwrap_or_else(|| new_self.last().unwrap().0.clone());

                {
                    let buf = guard.page_data_mut(sframe);
                    LeafPage::new(buf, key_len).load_entries(&new_sibling);
                }
                {
                    let buf = guard.page_data_mut(frame);
                    LeafPage::new(buf, key_len).load_entries(&new_self);
                }
                {
                    let buf = guard.page_data_mut(pframe);
                    InternalPage::new(buf, key_len).set_key_at((idx + 1) as u32, &new_separator);
                }
                guard.unpin_page(sibling_id, true)?;
                guard.unpin_page(page_id, true)?;
                guard.unpin_page(parent_id, true)?;
                Ok(())
            }
        } else {
            // Neither donor-eligible: merge into one page.
            let (keep_frame, drop_id, merged, next_after_drop) = if use_left {
                let mut merged = sibling_entries.clone();
                merged.extend(self_entries.clone());
                let next = {
                    let buf = guard.page_data_mut(frame);
                    LeafPage::new(buf, key_len).next_page_id()
                };
                (sframe, page_id, merged, next)
            } else {
                let mut merged = self_entries.clone();
                merged.extend(sibling_entries.clone());
                let next = {
                    let buf = guard.page_data_mut(sframe);
                    LeafPage::new(buf, key_len).next_page_id()
                };
                (frame, sibling_id, merged, next)
            };

            {
                let buf = guard.page_data_mut(keep_frame);
                let mut keep_leaf = LeafPage::new(buf, key_len);
                keep_leaf.load_entries(&merged);
                keep_leaf.set_next_page_id(next_after_drop);
            }
            guard.unpin_page(page_id, true)?;
            guard.unpin_page(sibling_id, true)?;
            guard.delete_page(drop_id)?;

            let remove_idx = parent_entries
                .iter()
                .position(|(_, v)| *v == drop_id)
                .unwrap() as u32;
            {
                let buf = guard.page_data_mut(pframe);
                InternalPage::new(buf, key_len).remove_at(remove_idx);
            }
            guard.unpin_page(parent_id, true)?;
            drop(guard);

            self.coalesce_or_redistribute_internal(parent_id, grandparent, parent_max)
        }
    }

    fn coalesce_or_redistribute_internal(
        &self,
        page_id: PageId,
        parent_id: PageId,
        max_size: u32,
    ) -> DbResult<()> {
        let key_len = self.key_len();
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(page_id)?;
        let size = {
            let buf = guard.page_data_mut(frame);
            InternalPage::new(buf, key_len).size()
        };

        if !parent_id.is_valid() {
            if size == 1 {
                let child = {
                    let buf = guard.page_data_mut(frame);
                    InternalPage::new(buf, key_len).value_at(0)
                };
                guard.unpin_page(page_id, false)?;
                guard.delete_page(page_id)?;
                drop(guard);
                self.set_parent(child, PageId::INVALID)?;
                self.set_root_page_id(child)?;
                return Ok(());
            }
            guard.unpin_page(page_id, false)?;
            return Ok(());
        }

        let min_size = max_size.div_ceil(2);
        if size >= min_size {
            guard.unpin_page(page_id, false)?;
            return Ok(());
        }

        let pframe = guard.fetch_page(parent_id)?;
        let (parent_entries, grandparent, parent_max) = {
            let buf = guard.page_data_mut(pframe);
            let internal = InternalPage::new(buf, key_len);
            (
                internal.all_entries(),
                internal.parent_page_id(),
                internal.max_size(),
            )
        };
        let idx = parent_entries
            .iter()
            .position(|(_, v)| *v == page_id)
            .expect("node must be a child of its recorded parent");

        let use_left = idx > 0;
        let sibling_id = if use_left {
            parent_entries[idx - 1].1
        } else {
            parent_entries[idx + 1].1
        };

        let sframe = guard.fetch_page(sibling_id)?;
        let sibling_entries = {
            let buf = guard.page_data_mut(sframe);
            InternalPage::new(buf, key_len).all_entries()
        };
        let self_entries = {
            let buf = guard.page_data_mut(frame);
            InternalPage::new(buf, key_len).all_entries()
        };

        let sibling_min_size = max_size.div_ceil(2);
        if sibling_entries.len() as u32 > sibling_min_size {
            // The sibling has spare entries: redistribute one across the
            // separator rather than merging.
            if use_left {
                let (borrow_key, borrow_child) = sibling_entries.last().unwrap().clone();
                let separator = parent_entries[idx].0.clone();

                let mut new_self = self_entries.clone();
                new_self.insert(0, (separator, borrow_child));
                let mut new_sibling = sibling_entries.clone();
                new_sibling.pop();

                {
                    let buf = guard.page_data_mut(sframe);
                    InternalPage::new(buf, key_len).load_entries(&new_sibling);
                }
                {
                    let buf = guard.page_data_mut(frame);
                    InternalPage::new(buf, key_len).load_entries(&new_self);
                }
                {
                    let buf = guard.page_data_mut(pframe);
                    InternalPage::new(buf, key_len).set_key_at(idx as u32, &borrow_key);
                }
                guard.unpin_page(sibling_id, true)?;
                guard.unpin_page(page_id, true)?;
                guard.unpin_page(parent_id, true)?;
                drop(guard);

                self.set_parent(borrow_child, page_id)
            } else {
                let (_, borrow_child) = sibling_entries.first().unwrap().clone();
                let separator = parent_entries[idx + 1].0.clone();

                let mut new_self = self_entries.clone();
                new_self.push((separator, borrow_child));
                let mut new_sibling = sibling_entries.clone();
                new_sibling.remove(0);
                let new_separator_key = new_sibling[0].0.clone();
                new_sibling[0].0 = vec![0u8; key_len];

                {
                    let buf = guard.page_data_mut(sframe);
                    InternalPage::new(buf, key_len).load_entries(&new_sibling);
                }
                {
                    let buf = guard.page_data_mut(frame);
                    InternalPage::new(buf, key_len).load_entries(&new_self);
                }
                {
                    let buf = guard.page_data_mut(pframe);
                    InternalPage::new(buf, key_len).set_key_at((idx + 1) as u32, &new_separator_key);
                }
                guard.unpin_page(sibling_id, true)?;
                guard.unpin_page(page_id, true)?;
                guard.unpin_page(parent_id, true)?;
                drop(guard);

                self.set_parent(borrow_child, page_id)
            }
        } else {
            // Neither donor-eligible: merge into one page.
            let separator_idx = if use_left { idx } else { idx + 1 };
            let separator = parent_entries[separator_idx].0.clone();

            let (keep_frame, keep_id, drop_id, merged, moved_children) = if use_left {
                let mut adjusted_self = self_entries.clone();
                adjusted_self[0].0 = separator;
                let mut merged = sibling_entries.clone();
                merged.extend(adjusted_self.clone());
                (sframe, sibling_id, page_id, merged, adjusted_self)
            } else {
                let mut adjusted_sibling = sibling_entries.clone();
                adjusted_sibling[0].0 = separator;
                let mut merged = self_entries.clone();
                merged.extend(adjusted_sibling.clone());
                (frame, page_id, sibling_id, merged, adjusted_sibling)
            };

            {
                let buf = guard.page_data_mut(keep_frame);
                InternalPage::new(buf, key_len).load_entries(&merged);
            }
            guard.unpin_page(page_id, true)?;
            guard.unpin_page(sibling_id, true)?;
            guard.delete_page(drop_id)?;

            let remove_idx = parent_entries
                .iter()
                .position(|(_, v)| *v == drop_id)
                .unwrap() as u32;
            {
                let buf = guard.page_data_mut(pframe);
                InternalPage::new(buf, key_len).remove_at(remove_idx);
            }
            guard.unpin_page(parent_id, true)?;
            drop(guard);

            for (_, child) in &moved_children {
                self.set_parent(*child, keep_id)?;
            }

            self.coalesce_or_redistribute_internal(parent_id, grandparent, parent_max)
        }
    }

    /// Deallocates every page in the tree and clears its root.
    #[tracing::instrument(skip(self))]
    pub fn destroy(&self) -> DbResult<()> {
        let root = self.root_page_id();
        if root.is_valid() {
            self.destroy_subtree(root)?;
        }
        self.set_root_page_id(PageId::INVALID)
    }

    fn destroy_subtree(&self, page_id: PageId) -> DbResult<()> {
        let key_len = self.key_len();
        let children = {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(page_id)?;
            let buf = guard.page_data_mut(frame);
            let children = if node::page_is_leaf(buf) {
                None
            } else {
                Some(
                    InternalPage::new(buf, key_len)
                        .children()
                        .collect::<Vec<_>>(),
                )
            };
            guard.unpin_page(page_id, false)?;
            children
        };

        if let Some(children) = children {
            for child in children {
                self.destroy_subtree(child)?;
            }
        }

        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        guard.delete_page(page_id)
    }

    /// Iterator over every `(key, RecordId)` pair in ascending key order.
    pub fn begin(&self) -> DbResult<IndexIterator<'_>> {
        if self.is_empty() {
            return Ok(IndexIterator::new(
                &self.pool,
                &self.key_schema,
                PageId::INVALID,
                0,
            ));
        }
        let key_len = self.key_len();
        let mut page_id = self.root_page_id();
        loop {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(page_id)?;
            let buf = guard.page_data_mut(frame);
            if node::page_is_leaf(buf) {
                guard.unpin_page(page_id, false)?;
                break;
            }
            let child = InternalPage::new(buf, key_len).value_at(0);
            guard.unpin_page(page_id, false)?;
            page_id = child;
        }
        Ok(IndexIterator::new(&self.pool, &self.key_schema, page_id, 0))
    }

    /// Iterator starting at the first entry whose key is `>= key`.
    pub fn begin_at(&self, key: &[Value]) -> DbResult<IndexIterator<'_>> {
        if self.is_empty() {
            return Ok(IndexIterator::new(
                &self.pool,
                &self.key_schema,
                PageId::INVALID,
                0,
            ));
        }
        let key_len = self.key_len();
        let key_bytes = self.key_schema.encode(key)?;
        let leaf_id = self.find_leaf_page(&key_bytes)?;

        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(leaf_id)?;
        let buf = guard.page_data_mut(frame);
        let leaf = LeafPage::new(buf, key_len);
        let index = leaf.lower_bound(&key_bytes, |a, b| self.cmp(a, b));
        guard.unpin_page(leaf_id, false)?;

        Ok(IndexIterator::new(&self.pool, &self.key_schema, leaf_id, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer::BufferPoolManager;
    use std::sync::{Arc, Mutex};
    use storage::DiskManager;
    use types::SqlType;

    fn tree(pool_size: usize) -> (tempfile::TempDir, BPlusTree) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("db.dat")).unwrap());
        let pool: SharedBufferPool = Arc::new(Mutex::new(BufferPoolManager::new(pool_size, disk)));
        let key_schema = KeySchema::new(vec![SqlType::Int32]);
        let tree = BPlusTree::new(1, pool, key_schema).unwrap();
        (dir, tree)
    }

    fn rid(n: i32) -> RecordId {
        RecordId::new(PageId(n), 0)
    }

    #[test]
    fn insert_then_get_value_round_trips() {
        let (_dir, tree) = tree(64);
        assert!(tree.insert(&[Value::Int32(5)], rid(5)).unwrap());
        assert_eq!(tree.get_value(&[Value::Int32(5)]).unwrap(), Some(rid(5)));
        assert_eq!(tree.get_value(&[Value::Int32(6)]).unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_dir, tree) = tree(64);
        assert!(tree.insert(&[Value::Int32(1)], rid(1)).unwrap());
        assert!(!tree.insert(&[Value::Int32(1)], rid(2)).unwrap());
    }

    #[test]
    fn many_inserts_force_splits_and_stay_queryable() {
        let (_dir, tree) = tree(64);
        for i in 0..2000 {
            assert!(tree.insert(&[Value::Int32(i)], rid(i)).unwrap());
        }
        for i in 0..2000 {
            assert_eq!(tree.get_value(&[Value::Int32(i)]).unwrap(), Some(rid(i)));
        }
    }

    #[test]
    fn iteration_visits_keys_in_order() {
        let (_dir, tree) = tree(64);
        for i in [5, 1, 3, 2, 4] {
            tree.insert(&[Value::Int32(i)], rid(i)).unwrap();
        }
        let keys: Vec<i32> = tree
            .begin()
            .unwrap()
            .map(|r| match r.unwrap().0[0] {
                Value::Int32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn remove_then_get_fails() {
        let (_dir, tree) = tree(64);
        tree.insert(&[Value::Int32(1)], rid(1)).unwrap();
        tree.remove(&[Value::Int32(1)]).unwrap();
        assert_eq!(tree.get_value(&[Value::Int32(1)]).unwrap(), None);
    }

    #[test]
    fn remove_missing_key_errors() {
        let (_dir, tree) = tree(64);
        tree.insert(&[Value::Int32(1)], rid(1)).unwrap();
        assert!(tree.remove(&[Value::Int32(2)]).is_err());
    }

    #[test]
    fn bulk_insert_then_remove_all_leaves_empty_tree() {
        let (_dir, tree) = tree(64);
        for i in 0..500 {
            tree.insert(&[Value::Int32(i)], rid(i)).unwrap();
        }
        for i in 0..500 {
            tree.remove(&[Value::Int32(i)]).unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&[Value::Int32(0)]).unwrap(), None);
    }

    #[test]
    fn reopen_recovers_root_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("db.dat")).unwrap());
        let pool: SharedBufferPool = Arc::new(Mutex::new(BufferPoolManager::new(64, disk)));
        {
            let tree = BPlusTree::new(1, pool.clone(), KeySchema::new(vec![SqlType::Int32])).unwrap();
            for i in 0..100 {
                tree.insert(&[Value::Int32(i)], rid(i)).unwrap();
            }
        }
        let reopened = BPlusTree::new(1, pool, KeySchema::new(vec![SqlType::Int32])).unwrap();
        assert_eq!(reopened.get_value(&[Value::Int32(50)]).unwrap(), Some(rid(50)));
    }

    #[test]
    fn begin_at_skips_to_lower_bound() {
        let (_dir, tree) = tree(64);
        for i in 0..20 {
            tree.insert(&[Value::Int32(i * 2)], rid(i)).unwrap();
        }
        let first = tree
            .begin_at(&[Value::Int32(15)])
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first.0[0], Value::Int32(16));
    }

    #[test]
    fn remove_of_leaf_minimum_updates_ancestor_separator() {
        let (_dir, tree) = tree(8);
        let key_len = tree.key_len();
        let enc = |v: i32| tree.key_schema.encode(&[Value::Int32(v)]).unwrap();

        let (leaf0_id, leaf1_id, root_id) = {
            let mut guard = tree.pool.lock().expect("buffer pool mutex poisoned");
            let (leaf1_id, leaf1_frame) = guard.new_page().unwrap();
            let (leaf0_id, leaf0_frame) = guard.new_page().unwrap();
            let (root_id, root_frame) = guard.new_page().unwrap();

            {
                let buf = guard.page_data_mut(leaf0_frame);
                let mut leaf = LeafPage::new(buf, key_len);
                leaf.init(leaf0_id, root_id, 4);
                for v in [1, 2] {
                    leaf.insert(&enc(v), rid(v), |a, b| tree.cmp(a, b));
                }
                leaf.set_next_page_id(leaf1_id);
            }
            {
                let buf = guard.page_data_mut(leaf1_frame);
                let mut leaf = LeafPage::new(buf, key_len);
                leaf.init(leaf1_id, root_id, 4);
                for v in [3, 4, 5] {
                    leaf.insert(&enc(v), rid(v), |a, b| tree.cmp(a, b));
                }
            }
            {
                let buf = guard.page_data_mut(root_frame);
                let mut root = InternalPage::new(buf, key_len);
                root.init(root_id, PageId::INVALID, 4);
                root.populate_new_root(leaf0_id, &enc(3), leaf1_id);
            }
            guard.unpin_page(leaf0_id, true).unwrap();
            guard.unpin_page(leaf1_id, true).unwrap();
            guard.unpin_page(root_id, true).unwrap();
            (leaf0_id, leaf1_id, root_id)
        };
        tree.set_root_page_id(root_id).unwrap();

        assert_eq!(tree.get_value(&[Value::Int32(3)]).unwrap(), Some(rid(3)));

        tree.remove(&[Value::Int32(3)]).unwrap();

        assert_eq!(tree.get_value(&[Value::Int32(3)]).unwrap(), None);
        assert_eq!(tree.get_value(&[Value::Int32(4)]).unwrap(), Some(rid(4)));
        assert_eq!(tree.get_value(&[Value::Int32(1)]).unwrap(), Some(rid(1)));

        let mut guard = tree.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(root_id).unwrap();
        let entries = {
            let buf = guard.page_data_mut(frame);
            InternalPage::new(buf, key_len).all_entries()
        };
        guard.unpin_page(root_id, false).unwrap();
        drop(guard);

        let (sep_key, _) = entries.iter().find(|(_, v)| *v == leaf1_id).unwrap();
        assert_eq!(tree.key_schema.decode(sep_key).unwrap(), vec![Value::Int32(4)]);
        let _ = leaf0_id;
    }

    #[test]
    fn fixup_ancestor_min_key_walks_up_past_leftmost_child() {
        let (_dir, tree) = tree(8);
        let key_len = tree.key_len();
        let enc = |v: i32| tree.key_schema.encode(&[Value::Int32(v)]).unwrap();

        let mut guard = tree.pool.lock().expect("buffer pool mutex poisoned");
        let (mid, mid_frame) = guard.new_page().unwrap();
        let (root, root_frame) = guard.new_page().unwrap();
        let leaf_a = PageId(301);
        let leaf_b = PageId(302);
        let other_child = PageId(303);

        {
            let buf = guard.page_data_mut(mid_frame);
            let mut mid_page = InternalPage::new(buf, key_len);
            mid_page.init(mid, root, 4);
            mid_page.populate_new_root(leaf_a, &enc(10), leaf_b);
        }
        {
            let buf = guard.page_data_mut(root_frame);
            let mut root_page = InternalPage::new(buf, key_len);
            root_page.init(root, PageId::INVALID, 4);
            root_page.populate_new_root(other_child, &enc(5), mid);
        }
        guard.unpin_page(mid, true).unwrap();
        guard.unpin_page(root, true).unwrap();
        drop(guard);

        tree.fixup_ancestor_min_key(leaf_a, mid, &enc(6)).unwrap();

        let mut guard = tree.pool.lock().expect("buffer pool mutex poisoned");
        let mid_frame = guard.fetch_page(mid).unwrap();
        let mid_entries = {
            let buf = guard.page_data_mut(mid_frame);
            InternalPage::new(buf, key_len).all_entries()
        };
        guard.unpin_page(mid, false).unwrap();
        // leaf_a is mid's leftmost (placeholder) child; its entry must be untouched.
        assert_eq!(mid_entries[0].1, leaf_a);

        let root_frame = guard.fetch_page(root).unwrap();
        let root_entries = {
            let buf = guard.page_data_mut(root_frame);
            InternalPage::new(buf, key_len).all_entries()
        };
        guard.unpin_page(root, false).unwrap();
        drop(guard);

        let (sep_key, _) = root_entries.iter().find(|(_, v)| *v == mid).unwrap();
        assert_eq!(tree.key_schema.decode(sep_key).unwrap(), vec![Value::Int32(6)]);
    }

    #[test]
    fn destroy_clears_root() {
        let (_dir, tree) = tree(64);
        for i in 0..300 {
            tree.insert(&[Value::Int32(i)], rid(i)).unwrap();
        }
        tree.destroy().unwrap();
        assert!(tree.is_empty());
    }
}
