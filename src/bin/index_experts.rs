// src/bin/index_experts.rs - Loads the KOL roster from Postgres into the search index
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::time::Instant;

use kolmatch_lib::matching::db::{fetch_experts, ExpertRow};
use kolmatch_lib::models::core::CanonicalPerson;
use kolmatch_lib::search::{ElasticIndex, SearchBackend};
use kolmatch_lib::utils::config::{parse_deployments, MatchingConfig};
use kolmatch_lib::utils::db_connect::connect;
use kolmatch_lib::utils::env::load_env;
use kolmatch_lib::utils::get_memory_usage;
use kolmatch_lib::utils::progress_bars::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct IndexArgs {
    /// Comma separated deployment ids, overrides MATCH_DEPLOYMENTS
    #[arg(long)]
    did: Option<String>,

    /// Only index KOLs whose default location is in this country (e.g. "Germany")
    #[arg(long)]
    country: Option<String>,

    /// Rows fetched and bulk-indexed per page
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = IndexArgs::parse();
    let start_time = Instant::now();

    load_env();

    let mut config = MatchingConfig::from_env().context("Invalid matching configuration")?;
    if let Some(raw) = &args.did {
        config.deployments = parse_deployments(raw).context("Invalid --did value")?;
    }

    let pool = connect().await.context("Failed to connect to database")?;
    let index = ElasticIndex::connect(&config.es_url, &config.es_index)
        .await
        .context("Failed to reach the search backend")?;
    let progress = ProgressConfig::from_env();

    info!(
        "Indexing experts for deployments {:?} into '{}'{}",
        config.deployments,
        config.es_index,
        args.country
            .as_deref()
            .map(|c| format!(" (country: {})", c))
            .unwrap_or_default()
    );

    let mut total_indexed = 0usize;
    for &deployment_id in &config.deployments {
        let spinner = progress.create_spinner(&format!("deployment {}", deployment_id));
        let mut last_id = 0i64;
        let mut indexed = 0usize;

        loop {
            let rows: Vec<ExpertRow> = fetch_experts(
                &pool,
                deployment_id,
                last_id,
                args.batch_size,
                args.country.as_deref(),
            )
            .await?;
            let Some(last) = rows.last() else { break };
            last_id = last.id;

            let people: Vec<CanonicalPerson> = rows.into_iter().map(ExpertRow::into_person).collect();
            let stored = index
                .index_people(&people)
                .await
                .with_context(|| format!("Bulk indexing failed for deployment {}", deployment_id))?;
            indexed += stored;

            if let Some(pb) = &spinner {
                pb.inc(people.len() as u64);
                if progress.should_show_memory() {
                    pb.set_message(format!(
                        "deployment {} ({} MB)",
                        deployment_id,
                        get_memory_usage().await
                    ));
                }
            }
        }

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        let live = index
            .count(deployment_id)
            .await
            .with_context(|| format!("Failed to count documents for deployment {}", deployment_id))?;
        info!(
            "Deployment {}: indexed {} experts, {} live documents in the index",
            deployment_id, indexed, live
        );
        total_indexed += indexed;
    }

    info!(
        "Indexed {} experts across {} deployments in {:.2?}",
        total_indexed,
        config.deployments.len(),
        start_time.elapsed()
    );
    Ok(())
}
