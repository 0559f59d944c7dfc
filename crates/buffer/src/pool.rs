use crate::replacer::LRUReplacer;
use common::{DbError, DbResult, PageId};
use hashbrown::HashMap;
use std::sync::Arc;
use storage::{DiskManager, Page, PAGE_SIZE};

struct Frame {
    page: Page,
    pin_count: u32,
    dirty: bool,
}

impl Frame {
    fn empty() -> Self {
        Self {
            page: Page::new(PageId::INVALID),
            pin_count: 0,
            dirty: false,
        }
    }
}

/// Caches a fixed number of pages in memory, reading through to and writing
/// back to a shared [`DiskManager`]. Callers pin a page while they hold a
/// reference to its bytes and unpin it when done; a page with a nonzero pin
/// count is never chosen for eviction.
///
/// Intended to be wrapped in `Arc<Mutex<BufferPoolManager>>` by callers that
/// share one pool across the table heap, the B+-tree, and the catalog.
pub struct BufferPoolManager {
    disk: Arc<DiskManager>,
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    replacer: LRUReplacer,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        Self {
            disk,
            frames,
            page_table: HashMap::new(),
            free_list: (0..pool_size).collect(),
            replacer: LRUReplacer::new(),
        }
    }

    fn victim_frame(&mut self) -> DbResult<usize> {
        if let Some(frame) = self.free_list.pop() {
            return Ok(frame);
        }
        let frame_idx = self
            .replacer
            .victim()
            .ok_or_else(|| DbError::Failed("buffer pool exhausted, all pages pinned".into()))?;

        let frame = &self.frames[frame_idx];
        if frame.dirty {
            self.disk.write_page(frame.page.page_id, &frame.page.data)?;
        }
        self.page_table.remove(&frame.page.page_id);
        Ok(frame_idx)
    }

    /// Pins `page_id` in a frame, reading it from disk if not already
    /// resident, and returns the frame index.
    #[tracing::instrument(skip(self))]
    pub fn fetch_page(&mut self, page_id: PageId) -> DbResult<usize> {
        if let Some(&frame_idx) = self.page_table.get(&page_id) {
            let frame = &mut self.frames[frame_idx];
            if frame.pin_count == 0 {
                self.replacer.pin(frame_idx);
            }
            frame.pin_count += 1;
            return Ok(frame_idx);
        }

        let frame_idx = self.victim_frame()?;
        let data = self.disk.read_page(page_id)?;
        let frame = &mut self.frames[frame_idx];
        frame.page = Page::from_bytes(page_id, data);
        frame.pin_count = 1;
        frame.dirty = false;
        self.page_table.insert(page_id, frame_idx);
        tracing::debug!(?page_id, frame_idx, "fetched page into buffer pool");
        Ok(frame_idx)
    }

    /// Allocates a new page on disk and pins it in a zeroed frame.
    #[tracing::instrument(skip(self))]
    pub fn new_page(&mut self) -> DbResult<(PageId, usize)> {
        let frame_idx = self.victim_frame()?;
        let page_id = self.disk.allocate_page()?;
        let frame = &mut self.frames[frame_idx];
        frame.page.reset(page_id);
        frame.pin_count = 1;
        frame.dirty = true;
        self.page_table.insert(page_id, frame_idx);
        tracing::debug!(?page_id, frame_idx, "allocated new page");
        Ok((page_id, frame_idx))
    }

    /// Decrements the pin count for `page_id`. Once it reaches zero the
    /// frame becomes eligible for eviction. `is_dirty` is OR'd into the
    /// frame's dirty flag so a page written by one pinner isn't lost if
    /// another pinner unpins with `is_dirty = false` afterward.
    pub fn unpin_page(&mut self, page_id: PageId, is_dirty: bool) -> DbResult<()> {
        let &frame_idx = self
            .page_table
            .get(&page_id)
            .ok_or_else(|| DbError::Failed(format!("unpin of page {page_id:?} not resident")))?;
        let frame = &mut self.frames[frame_idx];
        if frame.pin_count == 0 {
            tracing::warn!(?page_id, "unpin of page already at pin count zero, ignoring");
            return Ok(());
        }
        frame.dirty |= is_dirty;
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_idx);
        }
        Ok(())
    }

    pub fn flush_page(&mut self, page_id: PageId) -> DbResult<()> {
        let &frame_idx = self
            .page_table
            .get(&page_id)
            .ok_or_else(|| DbError::Failed(format!("flush of page {page_id:?} not resident")))?;
        let frame = &mut self.frames[frame_idx];
        self.disk.write_page(page_id, &frame.page.data)?;
        frame.dirty = false;
        Ok(())
    }

    pub fn flush_all(&mut self) -> DbResult<()> {
        let page_ids: Vec<PageId> = self.page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes `page_id` from the pool and deallocates it on disk. Fails if
    /// the page is still pinned by someone.
    pub fn delete_page(&mut self, page_id: PageId) -> DbResult<()> {
        if let Some(&frame_idx) = self.page_table.get(&page_id) {
            if self.frames[frame_idx].pin_count > 0 {
                return Err(DbError::Failed(format!(
                    "cannot delete pinned page {page_id:?}"
                )));
            }
            self.page_table.remove(&page_id);
            self.replacer.pin(frame_idx);
            self.free_list.push(frame_idx);
        }
        self.disk.deallocate_page(page_id)
    }

    pub fn page_data(&self, frame_idx: usize) -> &[u8; PAGE_SIZE] {
        &self.frames[frame_idx].page.data
    }

    pub fn page_data_mut(&mut self, frame_idx: usize) -> &mut [u8; PAGE_SIZE] {
        &mut self.frames[frame_idx].page.data
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Diagnostic predicate: true iff every frame currently has pin count 0.
    /// Intended for tests and shutdown paths that want to assert pin
    /// discipline was respected, not for production control flow.
    pub fn check_all_unpinned(&self) -> bool {
        self.frames.iter().all(|frame| frame.pin_count == 0)
    }
}
