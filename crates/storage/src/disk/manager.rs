use super::bitmap::{BitmapPage, BITMAP_SIZE};
use super::meta::DiskMeta;
use crate::PAGE_SIZE;
use common::{DbError, DbResult, PageId};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// Physical page holding the [`DiskMeta`] superblock.
pub const META_PHYSICAL_PAGE: u64 = 0;
/// Physical page holding the index-roots table.
pub const INDEX_ROOTS_PHYSICAL_PAGE: u64 = 1;

/// Translates logical data-page numbers to physical page numbers and back.
///
/// Physical layout: page 0 is the meta page, page 1 is the index-roots page,
/// and data pages start at physical page 2 in extents of `BITMAP_SIZE` pages,
/// each extent preceded by one bitmap page.
///
/// `physical(logical) = logical + 3 + logical / BITMAP_SIZE`
fn logical_to_physical(logical: u32) -> u64 {
    logical as u64 + 3 + (logical as u64) / (BITMAP_SIZE as u64)
}

fn bitmap_physical_page(extent: u32) -> u64 {
    2 + extent as u64 * (BITMAP_SIZE as u64 + 1)
}

/// Owns the single shared database file and serves whole-page reads and
/// writes plus bitmap-extent page allocation. Holds the file handle behind a
/// mutex since every operation seeks before it reads or writes.
pub struct DiskManager {
    file: Mutex<File>,
}

impl DiskManager {
    /// Opens (creating if absent) the database file at `path` and
    /// initializes the meta and index-roots pages if the file is new.
    #[tracing::instrument(skip(path))]
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let manager = Self {
            file: Mutex::new(file),
        };

        if is_new {
            tracing::info!(path = %path.display(), "initializing new database file");
            manager.write_physical_page(META_PHYSICAL_PAGE, &[0u8; PAGE_SIZE])?;
            let meta = DiskMeta::new();
            let mut buf = [0u8; PAGE_SIZE];
            meta.write_into(&mut buf);
            manager.write_physical_page(META_PHYSICAL_PAGE, &buf)?;

            let roots = super::index_roots::IndexRootsPage::new();
            let mut buf = [0u8; PAGE_SIZE];
            roots.write_into(&mut buf);
            manager.write_physical_page(INDEX_ROOTS_PHYSICAL_PAGE, &buf)?;
        }

        Ok(manager)
    }

    fn read_physical_page(&self, physical: u64) -> DbResult<[u8; PAGE_SIZE]> {
        let mut file = self.file.lock().expect("disk manager mutex poisoned");
        let offset = physical * PAGE_SIZE as u64;
        let len = file.metadata()?.len();
        let mut buf = [0u8; PAGE_SIZE];
        if offset >= len {
            return Ok(buf);
        }
        file.seek(SeekFrom::Start(offset))?;
        let available = (len - offset).min(PAGE_SIZE as u64) as usize;
        file.read_exact(&mut buf[..available])?;
        Ok(buf)
    }

    fn write_physical_page(&self, physical: u64, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        let mut file = self.file.lock().expect("disk manager mutex poisoned");
        let offset = physical * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Reads a logical data page (not the meta or index-roots page).
    #[tracing::instrument(skip(self))]
    pub fn read_page(&self, page_id: PageId) -> DbResult<[u8; PAGE_SIZE]> {
        if !page_id.is_valid() {
            return Err(DbError::Failed(format!("invalid page id {page_id:?}")));
        }
        self.read_physical_page(logical_to_physical(page_id.0 as u32))
    }

    #[tracing::instrument(skip(self, buf))]
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        if !page_id.is_valid() {
            return Err(DbError::Failed(format!("invalid page id {page_id:?}")));
        }
        self.write_physical_page(logical_to_physical(page_id.0 as u32), buf)
    }

    fn load_meta(&self) -> DbResult<DiskMeta> {
        let buf = self.read_physical_page(META_PHYSICAL_PAGE)?;
        DiskMeta::from_page_bytes(&buf)
            .ok_or_else(|| DbError::Failed("disk meta page has bad magic".into()))
    }

    fn store_meta(&self, meta: &DiskMeta) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        meta.write_into(&mut buf);
        self.write_physical_page(META_PHYSICAL_PAGE, &buf)
    }

    /// Allocates a new logical data page, scanning extents for one with a
    /// free slot and creating a fresh extent (and its bitmap page) if none
    /// has room.
    #[tracing::instrument(skip(self))]
    pub fn allocate_page(&self) -> DbResult<PageId> {
        let mut meta = self.load_meta()?;

        let mut target_extent = None;
        for extent in 0..meta.num_extents().max(1) {
            if meta.extent_used_pages(extent) < BITMAP_SIZE as u32 {
                target_extent = Some(extent);
                break;
            }
        }
        let extent = target_extent.unwrap_or(meta.num_extents());

        let bitmap_physical = bitmap_physical_page(extent);
        let bitmap_buf = self.read_physical_page(bitmap_physical)?;
        let mut bitmap = if meta.extent_used_pages(extent) == 0 && extent >= meta.num_extents() {
            BitmapPage::new()
        } else {
            BitmapPage::from_page_bytes(&bitmap_buf)
        };

        let offset = bitmap
            .allocate_page()
            .ok_or_else(|| DbError::Failed("extent exhausted during allocation".into()))?;

        let mut new_bitmap_buf = [0u8; PAGE_SIZE];
        bitmap.write_into(&mut new_bitmap_buf);
        self.write_physical_page(bitmap_physical, &new_bitmap_buf)?;

        meta.record_allocation(extent);
        self.store_meta(&meta)?;

        let logical = extent * BITMAP_SIZE as u32 + offset;
        tracing::debug!(logical, extent, "allocated page");
        Ok(PageId(logical as i32))
    }

    #[tracing::instrument(skip(self))]
    pub fn deallocate_page(&self, page_id: PageId) -> DbResult<()> {
        if !page_id.is_valid() {
            return Err(DbError::Failed(format!("invalid page id {page_id:?}")));
        }
        let logical = page_id.0 as u32;
        let extent = logical / BITMAP_SIZE as u32;
        let offset = logical % BITMAP_SIZE as u32;

        let bitmap_physical = bitmap_physical_page(extent);
        let bitmap_buf = self.read_physical_page(bitmap_physical)?;
        let mut bitmap = BitmapPage::from_page_bytes(&bitmap_buf);

        if !bitmap.deallocate_page(offset) {
            return Err(DbError::Failed(format!(
                "page {logical} was not allocated"
            )));
        }

        let mut new_bitmap_buf = [0u8; PAGE_SIZE];
        bitmap.write_into(&mut new_bitmap_buf);
        self.write_physical_page(bitmap_physical, &new_bitmap_buf)?;

        let mut meta = self.load_meta()?;
        meta.record_deallocation(extent);
        self.store_meta(&meta)?;

        tracing::debug!(logical, "deallocated page");
        Ok(())
    }

    pub fn is_page_free(&self, page_id: PageId) -> DbResult<bool> {
        let logical = page_id.0 as u32;
        let extent = logical / BITMAP_SIZE as u32;
        let offset = logical % BITMAP_SIZE as u32;
        let bitmap_buf = self.read_physical_page(bitmap_physical_page(extent))?;
        Ok(BitmapPage::from_page_bytes(&bitmap_buf).is_page_free(offset))
    }

    pub fn read_index_roots(&self) -> DbResult<super::index_roots::IndexRootsPage> {
        let buf = self.read_physical_page(INDEX_ROOTS_PHYSICAL_PAGE)?;
        Ok(super::index_roots::IndexRootsPage::from_page_bytes(&buf))
    }

    pub fn write_index_roots(&self, page: &super::index_roots::IndexRootsPage) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        page.write_into(&mut buf);
        self.write_physical_page(INDEX_ROOTS_PHYSICAL_PAGE, &buf)
    }
}
