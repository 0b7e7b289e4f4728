//! Local (filesystem cache + reqwest fetcher) implementation of the bulkapi pipeline:
//! the `DiskCache` (C3), `DataWalker` (C4), reference `SiteModel`s (C5), `Crawler` (C6),
//! `ImageModel` (C7), `Writer`/rotation (C8), and `RefreshLoop` (C9) from spec.md §4.

pub mod cache;
pub mod crawler;
pub mod fetcher;
pub mod image;
pub mod refresh;
pub mod sites;
pub mod walker;
pub mod writer;

pub use cache::DiskCache;
pub use crawler::crawl;
pub use fetcher::ReqwestFetcher;
pub use image::{image_previews, ImagePolicy};
pub use refresh::RefreshLoop;
pub use walker::{crawl_for_key, get_path};
pub use writer::write_atomic;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
