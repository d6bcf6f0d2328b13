//! Rankport - multi-tenant competition scoring service.
//!
//! `rankport serve` runs the HTTP API; the other subcommands are operator tools.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rankport_core::RankportConfig;
use rankport_core::types::Role;
use rankport_platform::Platform;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rankport", version, about = "Multi-tenant competition scoring service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create a tenant and its empty partition
    Provision {
        name: String,
        display_name: String,
    },
    /// Issue an HS256 session token signed with the configured secret
    Token {
        /// admin, organizer or player
        role: String,
        tenant: String,
        subject: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rankport=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = RankportConfig::load().context("load configuration")?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let platform = tokio::task::spawn_blocking({
                let config = config.clone();
                move || Platform::open(&config)
            })
            .await??;
            rankport_gateway::start(&config, Arc::new(platform)).await?;
        }
        Commands::Provision { name, display_name } => {
            let platform = Platform::open(&config)?;
            let tenant = platform.directory().provision(&name, &display_name)?;
            println!("provisioned tenant '{}' (id={})", tenant.name, tenant.id);
        }
        Commands::Token { role, tenant, subject, ttl } => {
            let role: Role = role.parse()?;
            let secret = config.auth.jwt_secret.as_deref()
                .filter(|s| !s.is_empty())
                .context("token signing needs auth.jwt_secret (or RANKPORT_JWT_SECRET)")?;
            println!("{}", rankport_platform::auth::create_token(role, &tenant, &subject, ttl, secret)?);
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
