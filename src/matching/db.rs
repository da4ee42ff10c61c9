// src/matching/db.rs - Postgres readers: OneKey records for matching, KOL rows for indexing
use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_postgres::Row;

use crate::matching::canonical::canonicalize;
use crate::models::core::{CanonicalPerson, ExternalRecord};
use crate::utils::db_connect::PgPool;

fn text(row: &Row, column: &str) -> String {
    row.get::<_, Option<String>>(column)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Moves the keyset cursor to the raw, untrimmed `src_cust_id` of a row.
/// Comparing against a trimmed id would hand "X " back on the next page.
fn advance_cursor(cursor: &mut String, raw_id: Option<String>) {
    if let Some(id) = raw_id {
        *cursor = id;
    }
}

fn onekey_record(row: &Row) -> ExternalRecord {
    let source_id = Some(text(row, "src_cust_id")).filter(|s| !s.is_empty());
    let mut record = ExternalRecord::new(
        source_id,
        &text(row, "first_name"),
        &text(row, "middle_name"),
        &text(row, "last_name"),
    )
    .with_location(&text(row, "city"), &text(row, "cntry"));
    record.org_name = text(row, "cust_name");
    record
}

/// Streams `public.onekey_record` in source-id order into `sender`, one keyset
/// page at a time. With `only_customer` set, just that record is sent.
/// Returns the number of records sent; stops early if the receiver is gone.
pub async fn stream_onekey_records(
    pool: &PgPool,
    batch_size: usize,
    only_customer: Option<&str>,
    sender: mpsc::Sender<ExternalRecord>,
) -> Result<usize> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for stream_onekey_records")?;

    const SELECT_COLUMNS: &str = "
        SELECT src_cust_id, first_name, middle_name, last_name, cust_name, city, cntry
        FROM public.onekey_record";

    if let Some(customer_id) = only_customer {
        let sql = format!("{} WHERE src_cust_id = $1", SELECT_COLUMNS);
        let rows = conn
            .query(sql.as_str(), &[&customer_id])
            .await
            .with_context(|| format!("Failed to fetch OneKey record {}", customer_id))?;
        let mut sent = 0;
        for row in &rows {
            if sender.send(onekey_record(row)).await.is_err() {
                break;
            }
            sent += 1;
        }
        info!("Loaded {} OneKey record(s) for {}", sent, customer_id);
        return Ok(sent);
    }

    let page_sql = format!(
        "{} WHERE src_cust_id > $1 ORDER BY src_cust_id LIMIT $2",
        SELECT_COLUMNS
    );
    let limit = batch_size.max(1) as i64;
    let mut last_id = String::new();
    let mut sent = 0;

    loop {
        let rows = conn
            .query(page_sql.as_str(), &[&last_id, &limit])
            .await
            .with_context(|| format!("Failed to fetch OneKey records after '{}'", last_id))?;
        if rows.is_empty() {
            break;
        }

        let page_start = last_id.clone();
        for row in &rows {
            advance_cursor(&mut last_id, row.get("src_cust_id"));
            let record = onekey_record(row);
            if sender.send(record).await.is_err() {
                debug!("Record receiver closed after {} records", sent);
                return Ok(sent);
            }
            sent += 1;
        }
        debug!("Streamed {} OneKey records so far", sent);
        if last_id == page_start {
            warn!("OneKey cursor did not advance past '{}', stopping", last_id);
            break;
        }
    }

    info!("Finished streaming {} OneKey records", sent);
    Ok(sent)
}

/// One KOL row plus the four alias sources aggregated by the ETL query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpertRow {
    pub id: i64,
    pub deployment_id: i32,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub rank_position: i64,
    pub city: String,
    pub country: String,
    pub alias_sources: [String; 4],
}

impl ExpertRow {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            deployment_id: row.get("did"),
            first_name: text(row, "fn"),
            middle_name: text(row, "mn"),
            last_name: text(row, "ln"),
            rank_position: row.get::<_, Option<i64>>("position").unwrap_or_default(),
            city: text(row, "city"),
            country: text(row, "country"),
            alias_sources: [text(row, "fn1"), text(row, "fn2"), text(row, "fn3"), text(row, "fn4")],
        }
    }

    pub fn into_person(self) -> CanonicalPerson {
        let sources: Vec<&str> = self.alias_sources.iter().map(String::as_str).collect();
        let fields = canonicalize(&self.first_name, &self.middle_name, &self.last_name, &sources);
        CanonicalPerson::from_canonical(
            self.id,
            self.deployment_id,
            fields,
            &self.country,
            &self.city,
            self.rank_position,
        )
    }
}

/// One keyset page of KOL rows for a deployment, ordered by id. Alias sources
/// are other spellings from entries and Embase, plus nickname table lookups
/// in both directions.
pub async fn fetch_experts(
    pool: &PgPool,
    deployment_id: i32,
    after_id: i64,
    limit: usize,
    country: Option<&str>,
) -> Result<Vec<ExpertRow>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_experts")?;

    const FETCH_SQL: &str = "
        SELECT
            k.id, k.first_name AS fn, k.middle_name AS mn, k.last_name AS ln,
            k.deployment_id AS did, r.position::BIGINT AS position,
            l.city, l.country_name AS country,
            string_agg(DISTINCT ke.first_name, ' ;;; ') AS fn1,
            string_agg(DISTINCT cem.first_name, ' ;;; ') AS fn2,
            (SELECT string_agg(DISTINCT f.name, ' ;;; ') FROM public.firstname f
                WHERE f.nickname = k.first_name) AS fn3,
            (SELECT string_agg(DISTINCT f.nickname, ' ;;; ') FROM public.firstname f
                WHERE f.name = k.first_name) AS fn4
        FROM public.kol k
        LEFT JOIN public.rank_score_kol r ON r.kol_id = k.id
        LEFT JOIN public.kol__entry ke
            ON ke.kol_id = k.id AND length(ke.first_name) > 1 AND ke.first_name <> k.first_name
        LEFT JOIN public.kol_embase kem ON kem.kol_id = k.id
        LEFT JOIN public.container__embase_entry cem
            ON cem.id = kem.embase_entry_id AND length(cem.first_name) > 1 AND cem.first_name <> k.first_name
        LEFT JOIN public.location l ON l.id = k.default_location_id
        WHERE k.deployment_id = $1
          AND k.id > $2
          AND ($3::TEXT IS NULL OR l.country_name ILIKE $3)
        GROUP BY k.id, r.position, l.city, l.country_name
        ORDER BY k.id
        LIMIT $4";

    let rows = conn
        .query(FETCH_SQL, &[&deployment_id, &after_id, &country, &(limit.max(1) as i64)])
        .await
        .with_context(|| {
            format!(
                "Failed to fetch experts for deployment {} after id {}",
                deployment_id, after_id
            )
        })?;

    Ok(rows.iter().map(ExpertRow::from_row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_keeps_raw_source_id() {
        let mut cursor = String::new();
        advance_cursor(&mut cursor, Some("WDEM0001 ".to_string()));
        assert_eq!(cursor, "WDEM0001 ");
        // the trimmed id sorts below the row, which would select it again
        assert!("WDEM0001" < cursor.as_str());

        advance_cursor(&mut cursor, None);
        assert_eq!(cursor, "WDEM0001 ");

        advance_cursor(&mut cursor, Some("  ".to_string()));
        assert_eq!(cursor, "  ");
    }

    #[test]
    fn test_expert_row_becomes_canonical_person() {
        let row = ExpertRow {
            id: 5711743,
            deployment_id: 1,
            first_name: "Jorge Eduardo".to_string(),
            middle_name: String::new(),
            last_name: "Cortes".to_string(),
            rank_position: 12,
            city: "Madrid".to_string(),
            country: "Spain".to_string(),
            alias_sources: [
                "George ;;; J.".to_string(),
                String::new(),
                "George".to_string(),
                "Jorgito".to_string(),
            ],
        };

        let person = row.into_person();
        assert_eq!(person.id, 5711743);
        assert_eq!(person.first_name, "Jorge");
        assert_eq!(person.middle_name, "Eduardo");
        assert_eq!(person.name_keyword, "Jorge Eduardo Cortes");
        assert_eq!(person.name_keyword_squash, "JorgeEduardoCortes");
        assert_eq!(person.aliases, vec!["George".to_string(), "Jorgito".to_string()]);
        assert_eq!(person.country, "Spain");
        assert_eq!(person.rank_position, 12);
        assert!(!person.deleted);
    }
}
