//! Append-only writes for the `properties` snapshot table.

use chrono::NaiveDate;
use rentwatch_core::ListingSnapshot;
use sqlx::PgPool;

use crate::DbError;

/// Appends a batch of snapshots verbatim.
///
/// A snapshot whose `(listing_id, observed_on, source_file)` triple is already
/// stored is skipped, so re-ingesting the same files is harmless. Returns the
/// number of rows actually inserted.
///
/// Uses a single `INSERT … SELECT * FROM UNNEST(…)` so the whole batch is one
/// round trip and one implicit transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn append_snapshots(pool: &PgPool, snapshots: &[ListingSnapshot]) -> Result<u64, DbError> {
    if snapshots.is_empty() {
        return Ok(0);
    }

    let n = snapshots.len();
    let mut listing_ids: Vec<String> = Vec::with_capacity(n);
    let mut observed_ons: Vec<NaiveDate> = Vec::with_capacity(n);
    let mut source_files: Vec<String> = Vec::with_capacity(n);
    let mut archive_object_names: Vec<Option<String>> = Vec::with_capacity(n);
    let mut urls: Vec<Option<String>> = Vec::with_capacity(n);
    let mut addresses: Vec<Option<String>> = Vec::with_capacity(n);
    let mut dispositions: Vec<Option<String>> = Vec::with_capacity(n);
    let mut areas: Vec<Option<f64>> = Vec::with_capacity(n);
    let mut rents: Vec<Option<i64>> = Vec::with_capacity(n);
    let mut utilities: Vec<Option<i64>> = Vec::with_capacity(n);
    let mut services: Vec<Option<i64>> = Vec::with_capacity(n);
    let mut fees: Vec<Option<i64>> = Vec::with_capacity(n);
    let mut available_froms: Vec<Option<NaiveDate>> = Vec::with_capacity(n);
    let mut tags: Vec<Option<String>> = Vec::with_capacity(n);
    let mut descriptions: Vec<Option<String>> = Vec::with_capacity(n);
    let mut latitudes: Vec<Option<f64>> = Vec::with_capacity(n);
    let mut longitudes: Vec<Option<f64>> = Vec::with_capacity(n);

    for s in snapshots {
        listing_ids.push(s.listing_id.clone());
        observed_ons.push(s.observed_on);
        source_files.push(s.source_file.clone());
        archive_object_names.push(s.archive_object_name.clone());
        urls.push(s.url.clone());
        addresses.push(s.address.clone());
        dispositions.push(s.disposition.clone());
        areas.push(s.area_m2);
        rents.push(s.rent);
        utilities.push(s.utilities);
        services.push(s.services);
        fees.push(s.fee);
        available_froms.push(s.available_from);
        tags.push(s.tags.clone());
        descriptions.push(s.description.clone());
        latitudes.push(s.latitude);
        longitudes.push(s.longitude);
    }

    let result = sqlx::query(
        "INSERT INTO properties \
             (listing_id, observed_on, source_file, archive_object_name, url, address, \
              disposition, area_m2, rent, utilities, services, fee, available_from, tags, \
              description, latitude, longitude) \
         SELECT * FROM UNNEST(\
              $1::text[], $2::date[], $3::text[], $4::text[], $5::text[], $6::text[], \
              $7::text[], $8::float8[], $9::int8[], $10::int8[], $11::int8[], $12::int8[], \
              $13::date[], $14::text[], $15::text[], $16::float8[], $17::float8[]) \
         ON CONFLICT (listing_id, observed_on, source_file) DO NOTHING",
    )
    .bind(&listing_ids)
    .bind(&observed_ons)
    .bind(&source_files)
    .bind(&archive_object_names)
    .bind(&urls)
    .bind(&addresses)
    .bind(&dispositions)
    .bind(&areas)
    .bind(&rents)
    .bind(&utilities)
    .bind(&services)
    .bind(&fees)
    .bind(&available_froms)
    .bind(&tags)
    .bind(&descriptions)
    .bind(&latitudes)
    .bind(&longitudes)
    .execute(pool)
    .await?;

    let inserted = result.rows_affected();
    tracing::info!(batch = n, inserted, "snapshots appended");
    Ok(inserted)
}

/// `(observed_on, source_file)` of every stored snapshot of `listing_id`,
/// oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_observations(
    pool: &PgPool,
    listing_id: &str,
) -> Result<Vec<(NaiveDate, String)>, DbError> {
    let rows = sqlx::query_as::<_, (NaiveDate, String)>(
        "SELECT observed_on, source_file FROM properties \
         WHERE listing_id = $1 \
         ORDER BY observed_on, source_file",
    )
    .bind(listing_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
