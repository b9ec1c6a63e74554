//! Live integration tests for rentwatch-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/rentwatch-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use chrono::NaiveDate;
use rentwatch_core::{DownloadStatus, ListingSnapshot, NewImage};
use rentwatch_db::{
    append_snapshots, apply_image_statuses, compact, count_redundant, health_check,
    insert_new_images, list_images_by_status, list_observations, ping, run_migrations,
    CompactionSpec, DbError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
}

fn snapshot(listing_id: &str, observed_on: NaiveDate, rent: Option<i64>) -> ListingSnapshot {
    ListingSnapshot {
        listing_id: listing_id.to_string(),
        observed_on,
        source_file: format!("{}_1", rentwatch_core::file_stamp(observed_on)),
        archive_object_name: Some(format!("listings/{listing_id}/{observed_on}")),
        url: Some(format!("https://site.test/detail/{listing_id}")),
        address: Some("Main Street 1".to_string()),
        disposition: Some("2+kk".to_string()),
        area_m2: Some(54.5),
        rent,
        utilities: Some(2500),
        services: None,
        fee: None,
        available_from: None,
        tags: Some("balcony".to_string()),
        description: Some("Bright flat".to_string()),
        latitude: Some(50.08),
        longitude: Some(14.42),
    }
}

fn dates(observations: &[(NaiveDate, String)]) -> Vec<NaiveDate> {
    observations.iter().map(|(d, _)| *d).collect()
}

fn new_image(listing_id: &str, filename: &str) -> NewImage {
    NewImage {
        listing_id: listing_id.to_string(),
        filename: filename.to_string(),
        object_name: format!("images/{listing_id}/{filename}"),
        url: format!("https://cdn.test/{listing_id}/{filename}"),
    }
}

// ---------------------------------------------------------------------------
// Section 1: Connectivity
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn ping_and_health_check_succeed(pool: sqlx::PgPool) {
    ping(&pool).await.expect("ping failed");
    health_check(&pool).await.expect("health_check failed");
}

#[sqlx::test(migrations = "../../migrations")]
async fn run_migrations_is_a_no_op_on_migrated_database(pool: sqlx::PgPool) {
    let applied = run_migrations(&pool).await.expect("run_migrations failed");
    assert_eq!(applied, 0);
}

// ---------------------------------------------------------------------------
// Section 2: Snapshot Append
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn append_snapshots_skips_existing_triples(pool: sqlx::PgPool) {
    let batch = vec![
        snapshot("A", day(1), Some(1000)),
        snapshot("A", day(2), Some(1000)),
    ];

    let first = append_snapshots(&pool, &batch).await.expect("first append");
    let second = append_snapshots(&pool, &batch).await.expect("second append");

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    let stored = list_observations(&pool, "A").await.expect("list");
    assert_eq!(dates(&stored), vec![day(1), day(2)]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn append_empty_batch_writes_nothing(pool: sqlx::PgPool) {
    assert_eq!(append_snapshots(&pool, &[]).await.expect("append"), 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn same_day_snapshots_from_different_files_are_both_kept(pool: sqlx::PgPool) {
    let morning = snapshot("A", day(1), Some(1000));
    let evening = ListingSnapshot {
        source_file: "240101_2".to_string(),
        ..snapshot("A", day(1), Some(1100))
    };

    let inserted = append_snapshots(&pool, &[morning, evening])
        .await
        .expect("append");

    assert_eq!(inserted, 2);
    let stored = list_observations(&pool, "A").await.expect("list");
    assert_eq!(
        stored.iter().map(|(_, s)| s.as_str()).collect::<Vec<_>>(),
        vec!["240101_1", "240101_2"]
    );
}

// ---------------------------------------------------------------------------
// Section 3: Compaction
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn compaction_keeps_first_changes_and_latest(pool: sqlx::PgPool) {
    append_snapshots(
        &pool,
        &[
            snapshot("A", day(1), Some(1000)),
            snapshot("A", day(2), Some(1000)),
            snapshot("A", day(3), Some(1200)),
            snapshot("A", day(4), Some(1200)),
        ],
    )
    .await
    .expect("append");

    let report = compact(&pool, &CompactionSpec::listings())
        .await
        .expect("compact");

    assert_eq!(report.redundant, 1);
    let stored = list_observations(&pool, "A").await.expect("list");
    assert_eq!(dates(&stored), vec![day(1), day(3), day(4)]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn compaction_is_idempotent(pool: sqlx::PgPool) {
    append_snapshots(
        &pool,
        &[
            snapshot("A", day(1), Some(1000)),
            snapshot("A", day(2), Some(1000)),
            snapshot("A", day(3), Some(1200)),
            snapshot("A", day(4), Some(1200)),
        ],
    )
    .await
    .expect("append");

    let spec = CompactionSpec::listings();
    compact(&pool, &spec).await.expect("first compact");
    let second = compact(&pool, &spec).await.expect("second compact");

    assert_eq!(second.redundant, 0);
    let stored = list_observations(&pool, "A").await.expect("list");
    assert_eq!(dates(&stored), vec![day(1), day(3), day(4)]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn single_snapshot_is_never_removed(pool: sqlx::PgPool) {
    append_snapshots(&pool, &[snapshot("solo", day(1), Some(900))])
        .await
        .expect("append");

    let report = compact(&pool, &CompactionSpec::listings())
        .await
        .expect("compact");

    assert_eq!(report.redundant, 0);
    assert_eq!(list_observations(&pool, "solo").await.expect("list").len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn run_of_duplicates_collapses_in_one_pass(pool: sqlx::PgPool) {
    let batch: Vec<_> = (1..=6).map(|d| snapshot("A", day(d), Some(1000))).collect();
    append_snapshots(&pool, &batch).await.expect("append");

    let report = compact(&pool, &CompactionSpec::listings())
        .await
        .expect("compact");

    assert_eq!(report.redundant, 4);
    let stored = list_observations(&pool, "A").await.expect("list");
    assert_eq!(dates(&stored), vec![day(1), day(6)]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn null_equals_null_but_not_a_value(pool: sqlx::PgPool) {
    append_snapshots(
        &pool,
        &[
            snapshot("A", day(1), None),
            snapshot("A", day(2), None),
            snapshot("A", day(3), Some(1000)),
            snapshot("A", day(4), None),
            snapshot("A", day(5), None),
        ],
    )
    .await
    .expect("append");

    compact(&pool, &CompactionSpec::listings())
        .await
        .expect("compact");

    let stored = list_observations(&pool, "A").await.expect("list");
    assert_eq!(dates(&stored), vec![day(1), day(3), day(4), day(5)]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn metadata_differences_do_not_count_as_changes(pool: sqlx::PgPool) {
    // Archive object names differ per snapshot; only business columns matter.
    append_snapshots(
        &pool,
        &[
            snapshot("A", day(1), Some(1000)),
            snapshot("A", day(2), Some(1000)),
            snapshot("A", day(3), Some(1000)),
        ],
    )
    .await
    .expect("append");

    let report = compact(&pool, &CompactionSpec::listings())
        .await
        .expect("compact");

    assert_eq!(report.redundant, 1);
    assert!(!report.columns.contains(&"archive_object_name".to_string()));
    assert!(!report.columns.contains(&"listing_id".to_string()));
    assert!(report.columns.contains(&"rent".to_string()));
}

#[sqlx::test(migrations = "../../migrations")]
async fn listings_are_compacted_independently(pool: sqlx::PgPool) {
    append_snapshots(
        &pool,
        &[
            snapshot("A", day(1), Some(1000)),
            snapshot("A", day(2), Some(1000)),
            snapshot("A", day(3), Some(1000)),
            snapshot("B", day(1), Some(1000)),
            snapshot("B", day(2), Some(2000)),
        ],
    )
    .await
    .expect("append");

    compact(&pool, &CompactionSpec::listings())
        .await
        .expect("compact");

    assert_eq!(
        dates(&list_observations(&pool, "A").await.expect("list A")),
        vec![day(1), day(3)]
    );
    assert_eq!(
        dates(&list_observations(&pool, "B").await.expect("list B")),
        vec![day(1), day(2)]
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn count_redundant_matches_compact_and_deletes_nothing(pool: sqlx::PgPool) {
    let batch: Vec<_> = (1..=5)
        .map(|d| snapshot("A", day(d), Some(if d < 3 { 1000 } else { 1100 })))
        .collect();
    append_snapshots(&pool, &batch).await.expect("append");
    let spec = CompactionSpec::listings();

    let planned = count_redundant(&pool, &spec).await.expect("count");
    assert_eq!(list_observations(&pool, "A").await.expect("list").len(), 5);

    let done = compact(&pool, &spec).await.expect("compact");
    assert_eq!(planned.redundant, 2);
    assert_eq!(done.redundant, planned.redundant);
    assert_eq!(planned.columns, done.columns);
}

#[sqlx::test(migrations = "../../migrations")]
async fn explicit_comparison_columns_ignore_other_changes(pool: sqlx::PgPool) {
    let second = ListingSnapshot {
        description: Some("Freshly painted".to_string()),
        ..snapshot("A", day(2), Some(1000))
    };
    append_snapshots(
        &pool,
        &[
            snapshot("A", day(1), Some(1000)),
            second,
            snapshot("A", day(3), Some(1000)),
        ],
    )
    .await
    .expect("append");

    let spec = CompactionSpec::listings().with_comparison_columns(["rent"]);
    let report = compact(&pool, &spec).await.expect("compact");

    assert_eq!(report.columns, vec!["rent".to_string()]);
    assert_eq!(report.redundant, 1);
    assert_eq!(
        dates(&list_observations(&pool, "A").await.expect("list")),
        vec![day(1), day(3)]
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn compacting_unknown_table_fails(pool: sqlx::PgPool) {
    let spec = CompactionSpec {
        table: "no_such_table".to_string(),
        ..CompactionSpec::listings()
    };

    let err = count_redundant(&pool, &spec).await.unwrap_err();
    assert!(matches!(err, DbError::UnknownTable(ref t) if t == "no_such_table"));
}

// ---------------------------------------------------------------------------
// Section 4: Images
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn insert_new_images_ignores_known_filenames(pool: sqlx::PgPool) {
    let first = insert_new_images(&pool, &[new_image("A", "1.jpg"), new_image("A", "2.jpg")])
        .await
        .expect("first insert");
    let second = insert_new_images(&pool, &[new_image("A", "2.jpg"), new_image("B", "1.jpg")])
        .await
        .expect("second insert");

    assert_eq!(first, 2);
    assert_eq!(second, 1);
    let pending = list_images_by_status(&pool, DownloadStatus::Pending)
        .await
        .expect("list");
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|i| i.downloaded == DownloadStatus::Pending));
    assert_eq!(pending[0].object_name, "images/A/1.jpg");
}

#[sqlx::test(migrations = "../../migrations")]
async fn apply_image_statuses_follows_lifecycle(pool: sqlx::PgPool) {
    insert_new_images(
        &pool,
        &[
            new_image("A", "1.jpg"),
            new_image("A", "2.jpg"),
            new_image("A", "3.jpg"),
        ],
    )
    .await
    .expect("insert");
    let pending = list_images_by_status(&pool, DownloadStatus::Pending)
        .await
        .expect("list");
    let (one, two, three) = (pending[0].id, pending[1].id, pending[2].id);

    let changed = apply_image_statuses(
        &pool,
        &[
            (one, DownloadStatus::Downloaded),
            (two, DownloadStatus::Failed),
            // Pending cannot jump straight to archived.
            (three, DownloadStatus::Archived),
        ],
    )
    .await
    .expect("first apply");
    assert_eq!(changed, 2);

    let changed = apply_image_statuses(
        &pool,
        &[
            (one, DownloadStatus::Archived),
            // Failed is terminal.
            (two, DownloadStatus::Downloaded),
        ],
    )
    .await
    .expect("second apply");
    assert_eq!(changed, 1);

    // Archived is terminal too.
    let changed = apply_image_statuses(&pool, &[(one, DownloadStatus::Pending)])
        .await
        .expect("third apply");
    assert_eq!(changed, 0);

    let by = |status| {
        let pool = pool.clone();
        async move {
            list_images_by_status(&pool, status)
                .await
                .expect("list")
                .into_iter()
                .map(|i| i.id)
                .collect::<Vec<_>>()
        }
    };
    assert_eq!(by(DownloadStatus::Archived).await, vec![one]);
    assert_eq!(by(DownloadStatus::Failed).await, vec![two]);
    assert_eq!(by(DownloadStatus::Pending).await, vec![three]);
    assert!(by(DownloadStatus::Downloaded).await.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn apply_image_statuses_last_update_per_id_wins(pool: sqlx::PgPool) {
    insert_new_images(&pool, &[new_image("A", "1.jpg")])
        .await
        .expect("insert");
    let id = list_images_by_status(&pool, DownloadStatus::Pending)
        .await
        .expect("list")[0]
        .id;

    let changed = apply_image_statuses(
        &pool,
        &[(id, DownloadStatus::Failed), (id, DownloadStatus::Downloaded)],
    )
    .await
    .expect("apply");

    assert_eq!(changed, 1);
    let downloaded = list_images_by_status(&pool, DownloadStatus::Downloaded)
        .await
        .expect("list");
    assert_eq!(downloaded.len(), 1);
    assert_eq!(downloaded[0].id, id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn apply_image_statuses_with_unknown_id_changes_nothing(pool: sqlx::PgPool) {
    let changed = apply_image_statuses(&pool, &[(424_242, DownloadStatus::Downloaded)])
        .await
        .expect("apply");
    assert_eq!(changed, 0);
}
