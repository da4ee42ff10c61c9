// src/main.rs
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use kolmatch_lib::matching::cascade::{CascadeMode, Resolver};
use kolmatch_lib::matching::conflict::PgReferenceCounter;
use kolmatch_lib::matching::manager::{run_matching_pipeline, RunOptions};
use kolmatch_lib::search::{ElasticIndex, SearchBackend};
use kolmatch_lib::utils::config::{parse_deployments, MatchingConfig};
use kolmatch_lib::utils::db_connect::connect;
use kolmatch_lib::utils::env::load_env;
use kolmatch_lib::utils::instantiate_run::{create_initial_matching_run, finalize_matching_run};
use kolmatch_lib::utils::progress_bars::logging::log_run_start;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct MatchArgs {
    /// Comma separated deployment ids, overrides MATCH_DEPLOYMENTS
    #[arg(long)]
    did: Option<String>,

    /// Match a single OneKey customer id
    #[arg(long)]
    onekey: Option<String>,

    /// Cascade mode, overrides CASCADE_MODE
    #[arg(long, value_enum)]
    mode: Option<CascadeMode>,

    /// Resolve and log matches without writing linkages
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = MatchArgs::parse();
    let start_time = Instant::now();

    load_env();

    let mut config = MatchingConfig::from_env().context("Invalid matching configuration")?;
    if let Some(raw) = &args.did {
        config.deployments = parse_deployments(raw).context("Invalid --did value")?;
    }
    if let Some(mode) = args.mode {
        config.cascade_mode = mode;
    }
    config.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    info!("Successfully connected to the database");

    let index = ElasticIndex::connect(&config.es_url, &config.es_index)
        .await
        .context("Failed to reach the search backend")?;
    let backend: Arc<dyn SearchBackend> = Arc::new(index);

    let resolver = Resolver::from_config(backend, &config)
        .with_reference_counter(Arc::new(PgReferenceCounter::new(pool.clone())));

    let run_id = Uuid::new_v4().to_string();
    let run_timestamp = Utc::now().naive_utc();
    let description = match (&args.onekey, args.dry_run) {
        (Some(id), _) => format!("Single record investigation for {}", id),
        (None, true) => "Dry run over the OneKey export".to_string(),
        (None, false) => "OneKey to KOL matching run".to_string(),
    };

    log_run_start(&run_id, &config.deployments, config.cascade_mode, args.dry_run);
    let mut stats = create_initial_matching_run(
        &pool,
        &run_id,
        run_timestamp,
        Some(description.as_str()),
        &config.deployments,
    )
    .await
    .context("Failed to create initial matching_run record")?;

    let options = RunOptions {
        only_customer: args.onekey.clone(),
        dry_run: args.dry_run,
    };
    let outcome = run_matching_pipeline(&pool, &resolver, &config, &options, &mut stats).await;

    // Record whatever was matched and written, even when the run failed
    finalize_matching_run(&pool, &stats)
        .await
        .context("Failed to finalize matching_run record")?;
    outcome.context("Matching run failed")?;

    info!(
        "Matching run {} finished in {:.2?}: {} records, {} candidates",
        run_id,
        start_time.elapsed(),
        stats.records_seen,
        stats.candidates_accepted
    );
    Ok(())
}
