use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use tastebook::{
    config::{self, ConfigUpdate},
    logging, server,
    service::RecipeService,
};

#[derive(Parser)]
#[command(author, version, about = "Tastebook recipe stats & ranking server")]
struct Cli {
    /// Path to the configuration file. Defaults to ./.tastebook/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the periodic ranking refresh job
    Serve(ServeArgs),
    /// Recompute both ranked views once and replace the cache
    Refresh,
    /// Rebuild a recipe's stats row from its raw like/review records
    Recalculate { recipe_id: String },
    /// Check a recipe's stats row against its raw records, repairing drift
    Audit { recipe_id: String },
    /// Show or update the stored configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Override the configured port for this run
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Default)]
struct ConfigArgs {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    top_rated_min_reviews: Option<u64>,
    #[arg(long)]
    top_rated_limit: Option<usize>,
    #[arg(long)]
    trending_limit: Option<usize>,
    #[arg(long)]
    trending_window_days: Option<i64>,
    #[arg(long)]
    refresh_interval_hours: Option<u64>,
}

impl ConfigArgs {
    fn is_empty(&self) -> bool {
        self.port.is_none()
            && self.top_rated_min_reviews.is_none()
            && self.top_rated_limit.is_none()
            && self.trending_limit.is_none()
            && self.trending_window_days.is_none()
            && self.refresh_interval_hours.is_none()
    }

    fn into_update(self) -> ConfigUpdate {
        ConfigUpdate {
            port: self.port,
            top_rated_min_reviews: self.top_rated_min_reviews,
            top_rated_limit: self.top_rated_limit,
            trending_limit: self.trending_limit,
            trending_window_days: self.trending_window_days,
            refresh_interval_hours: self.refresh_interval_hours,
            ..ConfigUpdate::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Serve(args) => {
            let (mut cfg, _path) = config::load_or_default(config)?;
            if let Some(port) = args.port {
                cfg.port = port;
            }
            server::run(cfg).await?;
        }
        Commands::Refresh => {
            let (cfg, _path) = config::load_or_default(config)?;
            let service = RecipeService::open(&cfg)?;
            service.refresh_rankings()?;
            println!("ranking cache refreshed");
        }
        Commands::Recalculate { recipe_id } => {
            let (cfg, _path) = config::load_or_default(config)?;
            let service = RecipeService::open(&cfg)?;
            match service.recalculate(&recipe_id)? {
                Some(stats) => println!(
                    "{}: {} reviews (avg {:.2}), {} likes",
                    recipe_id, stats.review_count, stats.average_rating, stats.like_count
                ),
                None => println!("{recipe_id}: no likes or reviews, stats row removed"),
            }
        }
        Commands::Audit { recipe_id } => {
            let (cfg, _path) = config::load_or_default(config)?;
            let service = RecipeService::open(&cfg)?;
            service.audit_recipe(&recipe_id)?;
            println!("{recipe_id}: audit complete");
        }
        Commands::Config(args) => {
            let (mut cfg, path) = config::load_or_default(config)?;
            if args.is_empty() {
                println!("{}", toml::to_string_pretty(&cfg)?);
                println!("# {}", path.display());
            } else {
                cfg.apply_update(args.into_update());
                cfg.save(&path)?;
                println!("configuration updated at {}", path.display());
            }
        }
    }

    Ok(())
}
