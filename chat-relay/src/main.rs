use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Mode},
    client,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout belongs to the chat itself.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn announce(line: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.mode() {
        Mode::Server {
            host,
            port,
            settings,
        } => {
            let server = Server::bind(&host, port, settings).await?;
            let addr = server.local_addr()?;
            info!(%addr, ?settings, "relay server started");
            announce(&format!("listening on {addr}")).await?;
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err.into());
            }
        }
        Mode::Client(config) => client::run(&config).await?,
    }

    Ok(())
}
