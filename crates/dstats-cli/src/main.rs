use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dstats_analytics::{district_rankings, DataPointBuilder};
use dstats_core::{DistrictStatisticsInput, RankingsSnapshot};
use dstats_index::{IndexConfig, TimeSeriesIndexWriter, TracingIndexLogger};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dstats")]
#[command(about = "District statistics time-series and rankings")]
struct Cli {
    /// Index root; defaults to DSTATS_TIME_SERIES_DIR
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a data point from a district statistics JSON file and index it
    Ingest {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        snapshot_id: String,
    },
    /// Print rankings for one district from a rankings snapshot JSON file
    Rankings {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        district: String,
    },
    /// Rebuild a district's index metadata from its partition files
    RefreshMetadata {
        #[arg(long)]
        district: String,
    },
    /// Print indexed data points within an inclusive date range
    Range {
        #[arg(long)]
        district: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = IndexConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.root_dir = data_dir;
    }
    let writer = TimeSeriesIndexWriter::new(config).with_logger(Arc::new(TracingIndexLogger));

    match cli.command {
        Commands::Ingest { input, snapshot_id } => {
            let text = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let district: DistrictStatisticsInput = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", input.display()))?;

            let point = DataPointBuilder::default().build(&snapshot_id, &district);
            let index = writer
                .write_data_point(&district.district_id, point)
                .await
                .with_context(|| format!("indexing district {}", district.district_id))?;
            let metadata = writer.update_metadata(&district.district_id).await?;
            info!(
                district_id = %district.district_id,
                program_year = %index.program_year,
                total_data_points = metadata.total_data_points,
                "ingest complete"
            );
        }
        Commands::Rankings { snapshot, district } => {
            let text = tokio::fs::read_to_string(&snapshot)
                .await
                .with_context(|| format!("reading {}", snapshot.display()))?;
            let snapshot: RankingsSnapshot =
                serde_json::from_str(&text).context("parsing rankings snapshot")?;
            let rankings = district_rankings(&district, &snapshot);
            println!("{}", serde_json::to_string_pretty(&rankings)?);
        }
        Commands::RefreshMetadata { district } => {
            let metadata = writer.update_metadata(&district).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Range {
            district,
            start,
            end,
        } => {
            let points = writer
                .read_data_points_in_range(&district, &start, &end)
                .await?;
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
    }

    Ok(())
}
