//! The `ingest` command: append a batch of extracted listing snapshots,
//! register their images, and compact the history.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::Context;
use rentwatch_core::{AppConfig, ListingSnapshot, NewImage};
use rentwatch_crawler::next_data::{image_refs, read_next_data};
use rentwatch_crawler::{DirSink, PayloadSink};
use rentwatch_db::CompactionSpec;
use serde::de::DeserializeOwned;

/// Parses a JSON-lines file. Blank lines are skipped; any malformed line
/// rejects the whole file.
async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), i + 1))
        })
        .collect()
}

/// Image references found in the staged listing documents the snapshots were
/// extracted from. Documents that are missing or unreadable are skipped.
async fn images_from_listings(
    listings: &dyn PayloadSink,
    snapshots: &[ListingSnapshot],
    object_prefix: &str,
) -> Vec<NewImage> {
    let sources: BTreeSet<&str> = snapshots.iter().map(|s| s.source_file.as_str()).collect();

    let mut images = Vec::new();
    for source in sources {
        let payload = match listings.read(source).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(source, error = %e, "listing document unavailable; no images taken");
                continue;
            }
        };
        match read_next_data(&String::from_utf8_lossy(&payload)) {
            Ok(data) => images.extend(image_refs(&data, object_prefix)),
            Err(e) => tracing::debug!(source, error = %e, "listing document unreadable; no images taken"),
        }
    }
    images
}

fn dedup_images(images: Vec<NewImage>) -> Vec<NewImage> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|i| seen.insert((i.listing_id.clone(), i.filename.clone())))
        .collect()
}

/// # Errors
///
/// Returns an error if an input file cannot be read or parsed, the store is
/// unavailable, or any write fails. The snapshot batch is appended in one
/// statement, so a failure leaves no partial batch behind.
pub(crate) async fn run_ingest(
    config: &AppConfig,
    snapshots_path: &Path,
    images_path: Option<&Path>,
    compact_after: bool,
) -> anyhow::Result<()> {
    let snapshots: Vec<ListingSnapshot> = read_jsonl(snapshots_path).await?;
    let mut images: Vec<NewImage> = match images_path {
        Some(path) => read_jsonl(path).await?,
        None => Vec::new(),
    };
    let listings = DirSink::new(config.listings_dir.clone());
    images.extend(images_from_listings(&listings, &snapshots, &config.image_object_prefix).await);
    let images = dedup_images(images);

    rentwatch_db::with_store(config, |pool| async move {
        let appended = rentwatch_db::append_snapshots(&pool, &snapshots).await?;
        let registered = rentwatch_db::insert_new_images(&pool, &images).await?;

        let compacted = if compact_after {
            rentwatch_db::compact(&pool, &CompactionSpec::listings())
                .await?
                .redundant
                .to_string()
        } else {
            "skipped".to_string()
        };

        println!(
            "ingest complete: {} of {} snapshots appended, {} of {} images registered, compacted: {}",
            appended,
            snapshots.len(),
            registered,
            images.len(),
            compacted
        );
        Ok::<_, anyhow::Error>(())
    })
    .await
}
