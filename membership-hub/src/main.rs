use anyhow::Result;
use clap::Parser;
use membership_hub::{
    api,
    cli::{self, Cli, Commands},
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(&cli)?;
    let store = cli::open_store(&config)?;

    match cli.command {
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.listen_addr.clone());
            let app = api::router(api::AppState::new(store, &config));
            let listener = TcpListener::bind(addr.as_str()).await?;
            info!(%addr, database = %config.database_path.display(), "listening");
            axum::serve(listener, app.into_make_service()).await?;
        }
        command => {
            let stdout = std::io::stdout();
            cli::execute(&store, command, &mut stdout.lock())?;
        }
    }
    Ok(())
}
