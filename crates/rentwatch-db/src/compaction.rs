//! History compaction for snapshot tables.
//!
//! Snapshots of one entity are ordered by `(date, source)`. A snapshot is
//! redundant when it has a predecessor, every comparison column is null-safe
//! equal to that predecessor's, and it is not the entity's most recent
//! snapshot. Deleting exactly the redundant set keeps the first appearance,
//! every change, and the latest observation of each entity, and a second pass
//! finds nothing left to delete.
//!
//! Every row is compared with its predecessor as it was before the pass
//! started (the statement reads one snapshot), so runs of identical rows
//! collapse in a single pass.

use sqlx::PgPool;

use crate::DbError;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Which table to compact and how its columns are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSpec {
    pub table: String,
    /// Stable identifier of the observed entity.
    pub id_column: String,
    /// Observation date.
    pub date_column: String,
    /// Source document reference; breaks ties between same-day snapshots.
    pub source_column: String,
    /// Metadata columns never compared, in addition to the three above.
    pub excluded_columns: Vec<String>,
    /// Explicit comparison set. `None` means every remaining column of the
    /// table.
    pub comparison_columns: Option<Vec<String>>,
}

impl CompactionSpec {
    /// The `properties` listing history.
    #[must_use]
    pub fn listings() -> Self {
        Self {
            table: "properties".to_owned(),
            id_column: "listing_id".to_owned(),
            date_column: "observed_on".to_owned(),
            source_column: "source_file".to_owned(),
            excluded_columns: vec!["archive_object_name".to_owned()],
            comparison_columns: None,
        }
    }

    #[must_use]
    pub fn with_comparison_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.comparison_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    fn is_metadata(&self, column: &str) -> bool {
        column == self.id_column
            || column == self.date_column
            || column == self.source_column
            || self.excluded_columns.iter().any(|c| c == column)
    }

    /// `idx_<table>_id_date`
    #[must_use]
    pub fn index_name(&self) -> String {
        format!("idx_{}_id_date", self.table)
    }
}

impl Default for CompactionSpec {
    fn default() -> Self {
        Self::listings()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Columns that were compared.
    pub columns: Vec<String>,
    /// Snapshots deleted (or, for a dry run, that would be deleted).
    pub redundant: u64,
}

/// Whether the compaction plan deletes or only counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlMode {
    Delete,
    Count,
}

/// Validates `name` as a plain Postgres identifier and double-quotes it.
///
/// Only ASCII letters, digits, and `_` are accepted, starting with a letter or
/// `_`, at most 63 bytes.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] for anything else.
pub fn quote_identifier(name: &str) -> Result<String, DbError> {
    let invalid = |reason: &str| DbError::InvalidIdentifier {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("must start with a letter or underscore"));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only ASCII letters, digits, and underscores are allowed"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("longer than 63 bytes"));
    }
    Ok(format!("\"{name}\""))
}

/// Builds the `CREATE INDEX IF NOT EXISTS` statement on `(id, date)`.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] if any name in `spec` is invalid.
pub fn build_index_sql(spec: &CompactionSpec) -> Result<String, DbError> {
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} ({id}, {date})",
        index = quote_identifier(&spec.index_name())?,
        table = quote_identifier(&spec.table)?,
        id = quote_identifier(&spec.id_column)?,
        date = quote_identifier(&spec.date_column)?,
    ))
}

/// Builds the compaction statement for `columns`.
///
/// With an empty column set every snapshot that is neither first nor latest
/// counts as redundant.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] if the table, a key column, or a
/// comparison column is not a valid identifier.
pub fn build_compaction_sql(
    spec: &CompactionSpec,
    columns: &[String],
    mode: SqlMode,
) -> Result<String, DbError> {
    let table = quote_identifier(&spec.table)?;
    let id = quote_identifier(&spec.id_column)?;
    let date = quote_identifier(&spec.date_column)?;
    let source = quote_identifier(&spec.source_column)?;

    let comparisons = columns
        .iter()
        .map(|c| {
            let c = quote_identifier(c)?;
            Ok(format!("cur.{c} IS NOT DISTINCT FROM prev.{c}"))
        })
        .collect::<Result<Vec<_>, DbError>>()?;
    let unchanged = if comparisons.is_empty() {
        "TRUE".to_owned()
    } else {
        comparisons.join("\n   AND ")
    };

    let history = format!(
        "WITH history AS (\n\
         SELECT {id} AS entity_id, {date} AS observed, {source} AS source_ref,\n\
         LAG({date}) OVER by_age AS prev_observed,\n\
         LAG({source}) OVER by_age AS prev_source_ref,\n\
         ROW_NUMBER() OVER (PARTITION BY {id} ORDER BY {date} DESC, {source} DESC) AS recency_rank\n\
         FROM {table}\n\
         WINDOW by_age AS (PARTITION BY {id} ORDER BY {date}, {source})\n\
         )\n"
    );
    let matches = format!(
        "cur.{id} = h.entity_id AND cur.{date} = h.observed AND cur.{source} = h.source_ref\n\
         AND prev.{id} = h.entity_id AND prev.{date} = h.prev_observed AND prev.{source} = h.prev_source_ref\n\
         AND h.prev_observed IS NOT NULL\n\
         AND h.recency_rank > 1\n\
         AND {unchanged}"
    );

    Ok(match mode {
        SqlMode::Delete => format!(
            "{history}DELETE FROM {table} AS cur\n\
             USING history AS h, {table} AS prev\n\
             WHERE {matches}"
        ),
        SqlMode::Count => format!(
            "{history}SELECT COUNT(*) FROM history AS h, {table} AS cur, {table} AS prev\n\
             WHERE {matches}"
        ),
    })
}

/// Creates the `(id, date)` index if it is missing, in its own transaction.
///
/// # Errors
///
/// Returns [`DbError`] if a name is invalid or the statement fails.
pub async fn ensure_history_index(pool: &PgPool, spec: &CompactionSpec) -> Result<(), DbError> {
    let sql = build_index_sql(spec)?;
    let mut tx = pool.begin().await?;
    sqlx::query(&sql).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Resolves the comparison columns for `spec`.
///
/// An explicit list is validated and returned as given. Otherwise every column
/// of the table in the current schema is used, in table order, minus the key
/// and excluded metadata columns.
///
/// # Errors
///
/// Returns [`DbError::UnknownTable`] if the table has no columns,
/// [`DbError::InvalidIdentifier`] for a bad explicit column name, or
/// [`DbError::Sqlx`] if the catalog query fails.
pub async fn comparison_columns(pool: &PgPool, spec: &CompactionSpec) -> Result<Vec<String>, DbError> {
    if let Some(explicit) = &spec.comparison_columns {
        for column in explicit {
            quote_identifier(column)?;
        }
        return Ok(explicit
            .iter()
            .filter(|c| !spec.is_metadata(c))
            .cloned()
            .collect());
    }

    let all = sqlx::query_scalar::<_, String>(
        "SELECT column_name::text FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(&spec.table)
    .fetch_all(pool)
    .await?;

    if all.is_empty() {
        return Err(DbError::UnknownTable(spec.table.clone()));
    }
    Ok(all.into_iter().filter(|c| !spec.is_metadata(c)).collect())
}

/// Deletes every redundant snapshot in one transaction.
///
/// Ensures the history index first, in a separate transaction. A crash
/// between the two leaves the table untouched.
///
/// # Errors
///
/// Returns [`DbError`] if the plan cannot be built or any statement fails;
/// nothing is deleted in that case.
pub async fn compact(pool: &PgPool, spec: &CompactionSpec) -> Result<CompactionReport, DbError> {
    ensure_history_index(pool, spec).await?;
    let columns = comparison_columns(pool, spec).await?;
    let sql = build_compaction_sql(spec, &columns, SqlMode::Delete)?;

    let mut tx = pool.begin().await?;
    let deleted = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
    tx.commit().await?;

    tracing::info!(
        table = %spec.table,
        columns = columns.len(),
        deleted,
        "compaction complete"
    );
    Ok(CompactionReport {
        columns,
        redundant: deleted,
    })
}

/// Counts the snapshots [`compact`] would delete, without deleting them.
///
/// # Errors
///
/// Returns [`DbError`] if the plan cannot be built or the query fails.
pub async fn count_redundant(pool: &PgPool, spec: &CompactionSpec) -> Result<CompactionReport, DbError> {
    let columns = comparison_columns(pool, spec).await?;
    let sql = build_compaction_sql(spec, &columns, SqlMode::Count)?;
    let count = sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?;
    Ok(CompactionReport {
        columns,
        redundant: u64::try_from(count).unwrap_or(0),
    })
}

#[cfg(test)]
#[path = "compaction_test.rs"]
mod tests;
