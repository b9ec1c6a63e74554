//! Read and write operations for the `images` table.

use std::collections::BTreeMap;

use rentwatch_core::{DownloadStatus, ImageRecord, NewImage};
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    id: i64,
    listing_id: String,
    filename: String,
    object_name: String,
    url: String,
    downloaded: i16,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = DbError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        let downloaded =
            DownloadStatus::try_from(row.downloaded).map_err(|_| DbError::InvalidStatus(row.downloaded))?;
        Ok(ImageRecord {
            id: row.id,
            listing_id: row.listing_id,
            filename: row.filename,
            object_name: row.object_name,
            url: row.url,
            downloaded,
        })
    }
}

/// Inserts image references as pending rows.
///
/// An image already stored for the same `(listing_id, filename)` is left as
/// is, whatever its status. Returns the number of rows inserted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_new_images(pool: &PgPool, images: &[NewImage]) -> Result<u64, DbError> {
    if images.is_empty() {
        return Ok(0);
    }

    let mut listing_ids: Vec<String> = Vec::with_capacity(images.len());
    let mut filenames: Vec<String> = Vec::with_capacity(images.len());
    let mut object_names: Vec<String> = Vec::with_capacity(images.len());
    let mut urls: Vec<String> = Vec::with_capacity(images.len());
    for image in images {
        listing_ids.push(image.listing_id.clone());
        filenames.push(image.filename.clone());
        object_names.push(image.object_name.clone());
        urls.push(image.url.clone());
    }

    let result = sqlx::query(
        "INSERT INTO images (listing_id, filename, object_name, url) \
         SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[]) \
         ON CONFLICT (listing_id, filename) DO NOTHING",
    )
    .bind(&listing_ids)
    .bind(&filenames)
    .bind(&object_names)
    .bind(&urls)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// All images currently in `status`, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or
/// [`DbError::InvalidStatus`] if a row carries an unknown status code.
pub async fn list_images_by_status(
    pool: &PgPool,
    status: DownloadStatus,
) -> Result<Vec<ImageRecord>, DbError> {
    let rows = sqlx::query_as::<_, ImageRow>(
        "SELECT id, listing_id, filename, object_name, url, downloaded \
         FROM images \
         WHERE downloaded = $1 \
         ORDER BY id",
    )
    .bind(status.as_i16())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ImageRecord::try_from).collect()
}

/// Applies a batch of status changes.
///
/// The `(id, status)` pairs are loaded into a transient `images_staging`
/// table and merged with one `UPDATE … FROM`, all inside one transaction.
/// Only `0 → 1`, `0 → 9`, and `1 → 3` take effect; any other requested
/// change is ignored. When an id appears more than once the last pair wins.
/// Returns the number of rows whose status changed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; no status changes in that
/// case.
pub async fn apply_image_statuses(
    pool: &PgPool,
    updates: &[(i64, DownloadStatus)],
) -> Result<u64, DbError> {
    if updates.is_empty() {
        return Ok(0);
    }

    let latest: BTreeMap<i64, DownloadStatus> = updates.iter().copied().collect();
    let ids: Vec<i64> = latest.keys().copied().collect();
    let statuses: Vec<i16> = latest.values().map(|s| s.as_i16()).collect();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "CREATE TEMP TABLE images_staging (\
             id BIGINT PRIMARY KEY, \
             downloaded SMALLINT NOT NULL\
         ) ON COMMIT DROP",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO images_staging (id, downloaded) \
         SELECT * FROM UNNEST($1::int8[], $2::int2[])",
    )
    .bind(&ids)
    .bind(&statuses)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE images AS i \
         SET downloaded = s.downloaded \
         FROM images_staging AS s \
         WHERE i.id = s.id \
           AND ((i.downloaded = 0 AND s.downloaded IN (1, 9)) \
             OR (i.downloaded = 1 AND s.downloaded = 3))",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    if updated < u64::try_from(ids.len()).unwrap_or(u64::MAX) {
        tracing::debug!(
            requested = ids.len(),
            updated,
            "some status changes were not legal transitions and were ignored"
        );
    }
    Ok(updated)
}
