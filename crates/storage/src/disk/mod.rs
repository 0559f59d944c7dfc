//! The disk layer: a bitmap-extent page allocator backed by a single shared
//! file, plus the two fixed physical pages (meta, index roots) that bootstrap
//! it.

pub mod bitmap;
pub mod index_roots;
pub mod manager;
pub mod meta;

pub use bitmap::BitmapPage;
pub use index_roots::IndexRootsPage;
pub use manager::DiskManager;
pub use meta::DiskMeta;
