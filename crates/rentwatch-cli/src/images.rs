//! The `images` and `archive` commands. Both read candidate rows from the
//! `images` table, work on them locally, and write back only the rows whose
//! status changed.

use rentwatch_core::{AppConfig, DownloadStatus, ImageRecord};
use rentwatch_crawler::{archive_images, CrawlPipeline, CrawlSettings, DirObjectStore, DirSink};
use rentwatch_proxy::ProxySession;

/// `(id, status)` for every record that left `from`.
fn status_changes(records: &[ImageRecord], from: DownloadStatus) -> Vec<(i64, DownloadStatus)> {
    records
        .iter()
        .filter(|r| r.downloaded != from)
        .map(|r| (r.id, r.downloaded))
        .collect()
}

/// Downloads every pending image into the image directory.
///
/// # Errors
///
/// Returns an error if the store or the proxy session is unavailable, or the
/// fetcher fails fatally. Individual download failures are logged; 404s are
/// recorded as failed and other errors leave the image pending.
pub(crate) async fn run_images(config: &AppConfig) -> anyhow::Result<()> {
    rentwatch_db::with_store(config, |pool| async move {
        let mut records = rentwatch_db::list_images_by_status(&pool, DownloadStatus::Pending).await?;
        if records.is_empty() {
            println!("no pending images");
            return Ok(());
        }

        let mut session = ProxySession::from_app_config(config)?;
        session.initialize().await?;
        let sink = DirSink::new(config.images_dir.clone());
        let mut pipeline = CrawlPipeline::new(session, CrawlSettings::from_app_config(config));

        let result = pipeline.fetch_images(&mut records, &sink).await;
        pipeline.fetcher_mut().close();
        let summary = result?;

        let changes = status_changes(&records, DownloadStatus::Pending);
        let persisted = rentwatch_db::apply_image_statuses(&pool, &changes).await?;

        println!(
            "images complete: {} pending, {} downloaded, {} failed, {} skipped, {} statuses saved",
            records.len(),
            summary.downloaded,
            summary.failed,
            summary.skipped,
            persisted
        );
        Ok::<_, anyhow::Error>(())
    })
    .await
}

/// Copies every downloaded image into the archive directory under its
/// object name.
///
/// # Errors
///
/// Returns an error if the store is unavailable or the status update fails.
/// Images that cannot be read or uploaded keep their status.
pub(crate) async fn run_archive(config: &AppConfig) -> anyhow::Result<()> {
    rentwatch_db::with_store(config, |pool| async move {
        let mut records =
            rentwatch_db::list_images_by_status(&pool, DownloadStatus::Downloaded).await?;
        if records.is_empty() {
            println!("no downloaded images to archive");
            return Ok(());
        }

        let sink = DirSink::new(config.images_dir.clone());
        let store = DirObjectStore::new(config.archive_dir.clone());
        let summary = archive_images(&mut records, &sink, &store).await;

        let changes = status_changes(&records, DownloadStatus::Downloaded);
        let persisted = rentwatch_db::apply_image_statuses(&pool, &changes).await?;

        println!(
            "archive complete: {} uploaded, {} already present, {} failed, {} statuses saved",
            summary.uploaded, summary.already_present, summary.failed, persisted
        );
        Ok::<_, anyhow::Error>(())
    })
    .await
}
