//! Sequential crawl: search pages, then listing documents, then images.
//!
//! Every stage tolerates per-item failure. A URL that exhausts its rotations,
//! returns 404, or cannot be staged is logged and skipped; only errors that
//! make every later fetch pointless (an inactive session) abort the stage.

use std::collections::HashSet;

use chrono::NaiveDate;
use rentwatch_core::{file_stamp, AppConfig, DownloadStatus, ImageRecord};
use rentwatch_proxy::Fetcher;

use crate::error::CrawlError;
use crate::next_data::{advert_uris, listing_url, page_count, read_next_data, total_count};
use crate::sink::{dated_key, PayloadSink};
use crate::trim::PayloadTrimmer;

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Search URL ending in `page=`; the page number is appended.
    pub search_url: String,
    pub listing_base_url: String,
    pub page_size: u32,
}

impl CrawlSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            search_url: config.search_url.clone(),
            listing_base_url: config.listing_base_url.clone(),
            page_size: config.page_size,
        }
    }
}

/// Totals for one `crawl` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages_discovered: u32,
    pub pages_written: usize,
    pub listing_urls: usize,
    pub listings_written: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageFetchSummary {
    /// Moved `Pending → Downloaded`.
    pub downloaded: usize,
    /// Moved `Pending → Failed` because the source answered 404.
    pub failed: usize,
    /// Left `Pending` after a transport or staging failure.
    pub skipped: usize,
}

/// Reads the result count from a search page and converts it to a page count.
///
/// Returns 0 (and logs) when the structured-data block is absent or does not
/// carry a count.
#[must_use]
pub fn page_count_from_payload(payload: &[u8], page_size: u32) -> u32 {
    let html = String::from_utf8_lossy(payload);
    let total = match read_next_data(&html).and_then(|data| total_count(&data)) {
        Ok(total) => total,
        Err(e) => {
            tracing::error!(error = %e, "could not read the result count; assuming no pages");
            return 0;
        }
    };
    let pages = page_count(total, page_size);
    u32::try_from(pages).unwrap_or_else(|_| {
        tracing::warn!(pages, "page count out of range; clamping");
        u32::MAX
    })
}

pub struct CrawlPipeline<F: Fetcher> {
    fetcher: F,
    settings: CrawlSettings,
    today: NaiveDate,
    trimmer: Option<Box<dyn PayloadTrimmer>>,
}

impl<F: Fetcher> CrawlPipeline<F> {
    /// Creates a pipeline stamping files with today's local date.
    pub fn new(fetcher: F, settings: CrawlSettings) -> Self {
        Self {
            fetcher,
            settings,
            today: chrono::Local::now().date_naive(),
            trimmer: None,
        }
    }

    /// Overrides the date used for staged file names.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.today = date;
        self
    }

    /// Passes listing documents through `trimmer` before staging them.
    #[must_use]
    pub fn with_trimmer(mut self, trimmer: impl PayloadTrimmer + 'static) -> Self {
        self.trimmer = Some(Box::new(trimmer));
        self
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    pub fn into_fetcher(self) -> F {
        self.fetcher
    }

    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        format!("{}{page}", self.settings.search_url)
    }

    /// Fetches the first search page and derives the number of pages.
    ///
    /// # Errors
    ///
    /// Only a fatal fetcher error propagates; an unfetchable or unparseable
    /// first page yields `Ok(0)`.
    pub async fn discover_page_count(&mut self) -> Result<u32, CrawlError> {
        let url = self.page_url(1);
        tracing::info!(url = %url, "discovering page count");
        let result = match self.fetcher.fetch(&url).await {
            Ok(result) => result,
            Err(e) if e.is_per_item() => {
                tracing::error!(url = %url, error = %e, "first page unavailable; assuming no pages");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(payload) = result.into_payload() else {
            tracing::error!(url = %url, "first page not found; assuming no pages");
            return Ok(0);
        };
        let pages = page_count_from_payload(&payload, self.settings.page_size);
        tracing::info!(pages, "pages to fetch");
        Ok(pages)
    }

    /// Fetches pages `1..=pages` in order, staging page `n` as `<YYMMDD>_<n>`.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Proxy`] only for fatal fetcher errors.
    pub async fn fetch_pages(
        &mut self,
        pages: u32,
        sink: &dyn PayloadSink,
    ) -> Result<usize, CrawlError> {
        let mut written = 0;
        for page in 1..=pages {
            let url = self.page_url(page);
            let key = dated_key(self.today, page as usize);
            if self.fetch_to_sink(&url, &key, sink, false).await? {
                tracing::debug!(page, key = %key, "page saved");
                written += 1;
            }
        }
        tracing::info!(written, requested = pages, "search pages complete");
        Ok(written)
    }

    /// Collects listing URLs from the search pages staged today.
    ///
    /// Pages from earlier days are ignored. Unreadable or unparseable pages are
    /// skipped. The result holds no duplicates and keeps discovery order.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] if the sink cannot be listed.
    pub async fn extract_listing_urls(
        &self,
        sink: &dyn PayloadSink,
    ) -> Result<Vec<String>, CrawlError> {
        let prefix = format!("{}_", file_stamp(self.today));
        let keys = sink.keys_with_prefix(&prefix).await?;

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for key in &keys {
            let payload = match sink.read(key).await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "skipping unreadable page");
                    continue;
                }
            };
            let data = match read_next_data(&String::from_utf8_lossy(&payload)) {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "skipping page without structured data");
                    continue;
                }
            };
            for uri in advert_uris(&data) {
                let url = listing_url(&self.settings.listing_base_url, &uri);
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
        tracing::info!(pages = keys.len(), urls = urls.len(), "listing URLs extracted");
        Ok(urls)
    }

    /// Fetches each listing in order, staging the `i`-th (1-based) as
    /// `<YYMMDD>_<i>`, trimmed if a trimmer is configured.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Proxy`] only for fatal fetcher errors.
    pub async fn fetch_listings(
        &mut self,
        urls: &[String],
        sink: &dyn PayloadSink,
    ) -> Result<usize, CrawlError> {
        let mut written = 0;
        for (i, url) in urls.iter().enumerate() {
            let key = dated_key(self.today, i + 1);
            if self.fetch_to_sink(url, &key, sink, true).await? {
                tracing::debug!(key = %key, url = %url, "listing saved");
                written += 1;
            }
        }
        tracing::info!(written, requested = urls.len(), "listings complete");
        Ok(written)
    }

    /// Downloads every pending image, staging bytes as
    /// `<listing_id>-<filename>` and updating each record's status in place.
    ///
    /// A 404 marks the record failed; a transport or staging failure leaves
    /// it pending for a later run. Records not pending are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Proxy`] only for fatal fetcher errors.
    pub async fn fetch_images(
        &mut self,
        records: &mut [ImageRecord],
        sink: &dyn PayloadSink,
    ) -> Result<ImageFetchSummary, CrawlError> {
        let mut summary = ImageFetchSummary::default();

        for record in records
            .iter_mut()
            .filter(|r| r.downloaded == DownloadStatus::Pending)
        {
            let result = match self.fetcher.fetch(&record.url).await {
                Ok(result) => result,
                Err(e) if e.is_per_item() => {
                    tracing::warn!(url = %record.url, error = %e, "image download failed; will retry later");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(bytes) = result.into_payload() else {
                record.transition(DownloadStatus::Failed);
                summary.failed += 1;
                continue;
            };

            match sink.write(&record.sink_key(), &bytes).await {
                Ok(()) => {
                    record.transition(DownloadStatus::Downloaded);
                    tracing::debug!(image = %record.sink_key(), "image saved");
                    summary.downloaded += 1;
                }
                Err(e) => {
                    tracing::warn!(image = %record.sink_key(), error = %e, "could not stage image");
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            downloaded = summary.downloaded,
            failed = summary.failed,
            skipped = summary.skipped,
            "image downloads complete"
        );
        Ok(summary)
    }

    /// Runs discovery, search pages, URL extraction, and listings in order.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] for fatal fetcher errors or an unlistable page sink.
    pub async fn crawl(
        &mut self,
        pages_sink: &dyn PayloadSink,
        listings_sink: &dyn PayloadSink,
    ) -> Result<CrawlSummary, CrawlError> {
        let pages_discovered = self.discover_page_count().await?;
        if pages_discovered == 0 {
            return Ok(CrawlSummary::default());
        }
        let pages_written = self.fetch_pages(pages_discovered, pages_sink).await?;
        let urls = self.extract_listing_urls(pages_sink).await?;
        let listings_written = self.fetch_listings(&urls, listings_sink).await?;

        Ok(CrawlSummary {
            pages_discovered,
            pages_written,
            listing_urls: urls.len(),
            listings_written,
        })
    }

    /// Returns `Ok(true)` if a payload was staged under `key`.
    async fn fetch_to_sink(
        &mut self,
        url: &str,
        key: &str,
        sink: &dyn PayloadSink,
        trim: bool,
    ) -> Result<bool, CrawlError> {
        let result = match self.fetcher.fetch(url).await {
            Ok(result) => result,
            Err(e) if e.is_per_item() => {
                tracing::error!(url = %url, error = %e, "fetch failed; skipping");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(mut payload) = result.into_payload() else {
            return Ok(false);
        };
        if trim {
            if let Some(trimmer) = &self.trimmer {
                payload = trimmer.trim(payload);
            }
        }
        match sink.write(key, &payload).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "could not stage payload");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
