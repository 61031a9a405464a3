//! fleetsync: kiosk fleet presence tracking and configuration sync.
//! One binary for the daemon, a headless display agent and admin commands.

use clap::Parser;

use fleetsync_core::protocol::AdminAuth;

mod cli;
mod client;
mod cmd_admin;
mod cmd_kiosk;
mod daemon;
mod seed;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("FLEETSYNC_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let auth = AdminAuth::new(args.admin_token.clone()).with_actor(args.actor.clone());

    match args.command {
        cli::Command::Daemon(opts) => {
            tracing::info!("fleetsync daemon starting");
            daemon::run_daemon(opts, args.admin_token).await?;
        }
        cli::Command::Kiosk(opts) => {
            cmd_kiosk::cmd_kiosk(&args.server, opts).await?;
        }
        cli::Command::Stats => cmd_admin::cmd_stats(&args.server, auth).await?,
        cli::Command::Active => cmd_admin::cmd_active(&args.server, auth).await?,
        cli::Command::Config => cmd_admin::cmd_config(&args.server, auth).await?,
        cli::Command::Module(opts) => cmd_admin::cmd_module(&args.server, auth, opts).await?,
        cli::Command::Modules(opts) => cmd_admin::cmd_modules(&args.server, auth, opts).await?,
        cli::Command::Maintenance(opts) => {
            cmd_admin::cmd_maintenance(&args.server, auth, opts).await?;
        }
    }

    Ok(())
}
