//! The `crawl` command: search pages and listing documents through a verified
//! proxy session.

use rentwatch_core::AppConfig;
use rentwatch_crawler::{CrawlPipeline, CrawlSettings, DirSink, NextDataTrimmer};
use rentwatch_proxy::ProxySession;

/// Initialises a proxy session, runs the crawl into the configured page and
/// listing directories, and closes the session whatever the outcome.
///
/// # Errors
///
/// Returns an error if the session cannot be configured or verified, or if
/// the crawl hits a fatal fetcher error. Per-page and per-listing failures are
/// logged and skipped.
pub(crate) async fn run_crawl(config: &AppConfig) -> anyhow::Result<()> {
    let mut session = ProxySession::from_app_config(config)?;
    session.initialize().await?;
    tracing::info!(
        endpoint = %session.pool().current(),
        "proxy session verified"
    );

    let pages = DirSink::new(config.pages_dir.clone());
    let listings = DirSink::new(config.listings_dir.clone());
    let mut pipeline = CrawlPipeline::new(session, CrawlSettings::from_app_config(config))
        .with_trimmer(NextDataTrimmer);

    let result = pipeline.crawl(&pages, &listings).await;
    pipeline.fetcher_mut().close();
    let summary = result?;

    println!(
        "crawl complete: {} pages discovered, {} pages written, {} listing URLs, {} listings written",
        summary.pages_discovered, summary.pages_written, summary.listing_urls, summary.listings_written
    );
    Ok(())
}
