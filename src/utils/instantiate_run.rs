use crate::{models::stats_models::MatchRunStats, utils::db_connect::PgPool};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;

pub async fn create_initial_matching_run(
    pool: &PgPool,
    run_id: &str,
    run_timestamp: NaiveDateTime,
    description: Option<&str>,
    deployments: &[i32],
) -> Result<MatchRunStats> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for create_initial_matching_run")?;

    const INSERT_SQL: &str = "
        INSERT INTO public.matching_run (
            id, run_timestamp, description, deployments,
            records_seen, records_skipped, resolutions, resolution_errors,
            candidates_accepted, linkages_written, linkages_failed, matching_time
        )
        VALUES ($1, $2, $3, $4, 0, 0, 0, 0, 0, 0, 0, 0.0)
    ";

    let deployment_list: Vec<i32> = deployments.to_vec();
    conn.execute(INSERT_SQL, &[&run_id, &run_timestamp, &description, &deployment_list])
        .await
        .context("Failed to insert initial matching_run record")?;

    info!("Created initial matching_run record with ID: {}", run_id);

    Ok(MatchRunStats::new(run_id, run_timestamp, description, deployments))
}

pub async fn finalize_matching_run(pool: &PgPool, stats: &MatchRunStats) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for finalize_matching_run")?;

    const UPDATE_SQL: &str = "
        UPDATE public.matching_run SET
            records_seen = $2, records_skipped = $3, resolutions = $4, resolution_errors = $5,
            candidates_accepted = $6, linkages_written = $7, linkages_failed = $8, matching_time = $9
        WHERE id = $1
    ";

    conn.execute(
        UPDATE_SQL,
        &[
            &stats.run_id,
            &(stats.records_seen as i64),
            &(stats.records_skipped as i64),
            &(stats.resolutions as i64),
            &(stats.resolution_errors as i64),
            &(stats.candidates_accepted as i64),
            &(stats.linkages_written as i64),
            &(stats.linkages_failed as i64),
            &stats.matching_time,
        ],
    )
    .await
    .context("Failed to finalize matching_run record")?;

    info!("Finalized matching_run record {}", stats.run_id);
    Ok(())
}
