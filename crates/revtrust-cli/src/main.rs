mod analyze;
mod egress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use revtrust_core::SourceVariant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "revtrust-cli")]
#[command(about = "RevTrust review authenticity command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, persist and grade one product's reviews
    Analyze {
        /// 10-character product id (ASIN)
        product_id: String,
        /// Marketplace country code (e.g. us, gb, de)
        #[arg(long, default_value = "us")]
        country: String,
    },
    /// Fetch reviews and print a summary without persisting anything
    Fetch {
        /// 10-character product id (ASIN)
        product_id: String,
        /// Marketplace country code (e.g. us, gb, de)
        #[arg(long, default_value = "us")]
        country: String,
        /// Use only this source instead of the configured fallback order
        #[arg(long)]
        source: Option<SourceVariant>,
        /// Number of sample reviews to print
        #[arg(long, default_value_t = 5)]
        show: usize,
    },
    /// Egress file tools
    Egress {
        #[command(subcommand)]
        command: EgressCommands,
    },
    /// Apply pending database migrations
    Migrate,
}

#[derive(Debug, Subcommand)]
enum EgressCommands {
    /// Validate the egress file and list its credentials and routes
    Check {
        #[arg(long, env = "REVTRUST_EGRESS_PATH", default_value = "./config/egress.yaml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let fallback_level = std::env::var("REVTRUST_LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Analyze {
            product_id,
            country,
        }) => {
            let config = revtrust_core::load_app_config()?;
            analyze::run_analyze(&config, &product_id, &country).await?;
        }
        Some(Commands::Fetch {
            product_id,
            country,
            source,
            show,
        }) => {
            let config = revtrust_core::load_app_config()?;
            analyze::run_fetch(&config, &product_id, &country, source, show).await?;
        }
        Some(Commands::Egress {
            command: EgressCommands::Check { path },
        }) => egress::run_egress_check(&path)?,
        Some(Commands::Migrate) => {
            let config = revtrust_core::load_app_config()?;
            let pool_config = revtrust_db::PoolConfig::from_app_config(&config);
            let pool = revtrust_db::connect_pool(&config.database_url, pool_config).await?;
            let applied = revtrust_db::run_migrations(&pool).await?;
            println!("migrations applied: {applied}");
        }
        None => println!("revtrust-cli ready; run with --help to list commands"),
    }

    Ok(())
}
