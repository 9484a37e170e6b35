use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use igdb_harvest::error::HarvestError;
use igdb_harvest::harvest::cleanup::cleanup;
use igdb_harvest::harvest::report::verify_files;
use igdb_harvest::harvest::{HarvestConfig, Harvester};
use igdb_harvest::igdb::transport::IgdbHttpTransport;
use igdb_harvest::logging::init_tracing;
use igdb_harvest::util::env;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "IGDB catalog harvester")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

/// Per-run overrides layered on top of the environment.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Directory holding the harvest files (defaults to HARVEST_DIR or .)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,
    /// Shared request rate across all endpoints
    #[arg(long, global = true)]
    rps: Option<u32>,
    /// Games per /games page (max 500)
    #[arg(long, global = true)]
    page_size: Option<usize>,
    /// Stop after this many /games pages (0 = all)
    #[arg(long, global = true)]
    max_pages: Option<usize>,
    /// IDs per related-entity request
    #[arg(long, global = true)]
    batch_size: Option<usize>,
    /// Games stitched per enrichment page
    #[arg(long, global = true)]
    game_chunk: Option<usize>,
}

impl Overrides {
    fn apply(&self, cfg: &mut HarvestConfig) {
        if let Some(dir) = &self.dir {
            cfg.output_dir = dir.clone();
        }
        if let Some(rps) = self.rps {
            cfg.requests_per_second = rps.max(1);
        }
        if let Some(size) = self.page_size {
            cfg.page_size = size;
        }
        if let Some(pages) = self.max_pages {
            cfg.max_pages = pages;
        }
        if let Some(size) = self.batch_size {
            cfg.batch_size = size.max(1);
        }
        if let Some(chunk) = self.game_chunk {
            cfg.game_chunk = chunk.max(1);
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Page every game from /games into games_partial.json
    Games,
    /// Resolve related entities and write games_enriched.json
    Enrich {
        /// Continue from the existing enriched checkpoint (or HARVEST_RESUME=1)
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// Compare raw and enriched sets and write data_verification_report.json
    Verify,
    /// Delete intermediate harvest files
    Cleanup,
    /// games, then enrich, then verify
    Run,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to encode summary")?
    );
    Ok(())
}

fn harvester(cfg: HarvestConfig, cancel: CancellationToken) -> Result<Harvester> {
    let transport = IgdbHttpTransport::new_from_env().context("IGDB transport setup failed")?;
    Ok(Harvester::new(cfg, Arc::new(transport), cancel))
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target = "harvest", "interrupt received; finishing current work and checkpointing");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info")?;
    env::bootstrap_cli("harvest");

    let cli = Cli::parse();
    let mut cfg = HarvestConfig::from_env();
    cli.overrides.apply(&mut cfg);
    info!(
        target = "harvest",
        dir = %cfg.output_dir.display(),
        rps = cfg.requests_per_second,
        page_size = cfg.page_size,
        batch_size = cfg.batch_size,
        game_chunk = cfg.game_chunk,
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let outcome = match cli.command {
        Commands::Games => {
            let summary = harvester(cfg, cancel)?.harvest_games().await;
            summary.map_err(anyhow::Error::from).and_then(|s| print_json(&s))
        }
        Commands::Enrich { resume } => {
            let resume = resume || env::env_flag("HARVEST_RESUME", false);
            let summary = harvester(cfg, cancel)?.enrich(resume).await;
            summary.map_err(anyhow::Error::from).and_then(|s| print_json(&s))
        }
        Commands::Verify => match verify_files(&cfg).await {
            Ok(report) => print_json(&report.summary),
            Err(err) => Err(err.into()),
        },
        Commands::Cleanup => {
            let summary = cleanup(&cfg.intermediate_files()).await;
            print_json(&summary)
        }
        Commands::Run => run_all(cfg, cancel).await,
    };

    if let Err(err) = &outcome {
        let phase = err
            .downcast_ref::<HarvestError>()
            .map_or_else(|| "setup".to_string(), |e| e.phase().to_string());
        error!(target = "harvest", phase = %phase, error = %format!("{err:#}"), "harvest failed");
    }
    outcome
}

async fn run_all(cfg: HarvestConfig, cancel: CancellationToken) -> Result<()> {
    let harvester = harvester(cfg, cancel)?;

    let games = harvester.harvest_games().await?;
    print_json(&games)?;
    if games.cancelled {
        info!(target = "harvest", "cancelled after games phase; enrichment skipped");
        return Ok(());
    }

    let enriched = harvester.enrich(false).await?;
    print_json(&enriched)?;
    if enriched.cancelled {
        info!(target = "harvest", "cancelled during enrichment; run `enrich --resume` to continue");
        return Ok(());
    }

    let report = verify_files(harvester.config()).await?;
    print_json(&report.summary)
}
