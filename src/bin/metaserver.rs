use clap::Parser;
use metaserver::{MetaServer, DEFAULT_RPC_PORT};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// configuration file path
    #[clap(name = "CONFIG")]
    config: String,

    /// RPC port to listen on
    #[clap(short, long, default_value_t = DEFAULT_RPC_PORT)]
    port: u16,

    /// Address to bind the RPC listener to
    #[clap(short, long, default_value = "0.0.0.0")]
    address: String,

    /// Print debug information
    #[clap(long)]
    debug: bool,
}

/// Cancel `shutdown` on Ctrl-C, or SIGTERM on unix
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let server = MetaServer::new(cli.config).with_address(cli.address);
    if let Err(e) = server.start(cli.port).await {
        error!("{}: {}", e.classification(), e);
        server.stop().await;
        std::process::exit(1);
    }

    server.block_until_termination(shutdown).await;
    info!("metaserver exited");
}
