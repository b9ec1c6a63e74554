//! The crawl side of rentwatch: paginated search pages, listing documents,
//! and listing images, fetched through a [`Fetcher`](rentwatch_proxy::Fetcher)
//! and staged as raw payloads.

pub mod archive;
pub mod error;
pub mod next_data;
pub mod pipeline;
pub mod sink;
pub mod trim;

pub use archive::{archive_images, ArchiveSummary, DirObjectStore, ObjectStore};
pub use error::CrawlError;
pub use pipeline::{
    page_count_from_payload, CrawlPipeline, CrawlSettings, CrawlSummary, ImageFetchSummary,
};
pub use sink::{dated_key, DirSink, PayloadSink};
pub use trim::{NextDataTrimmer, PayloadTrimmer};
