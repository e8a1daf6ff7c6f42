use std::path::PathBuf;

use clap::Parser;

use procmesh::builtin_factory;
use procmesh::logging::LoggingOptions;

#[derive(Parser, Debug)]
#[command(name = "procmesh-host", version, about = "Stock procmesh subordinate process")]
struct Cli {
    /// Unix socket the parent process is listening on.
    #[arg(long, value_name = "PATH")]
    socket: PathBuf,

    /// Process unique id assigned by the parent.
    #[arg(long, value_name = "ID")]
    process_id: String,

    #[command(flatten)]
    logging: LoggingOptions,
}

#[cfg(unix)]
#[tokio::main]
async fn main() {
    use std::sync::Arc;

    use procmesh::cluster::run_host;
    use procmesh::channel::ChannelConfig;

    let cli = Cli::parse();
    cli.logging.init();

    let factory = Arc::new(builtin_factory());
    let result = tokio::select! {
        result = run_host(&cli.socket, &cli.process_id, factory, ChannelConfig::default()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; shutting down");
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[cfg(not(unix))]
fn main() {
    let _ = Cli::parse();
    eprintln!("error: procmesh-host requires a Unix platform");
    std::process::exit(2);
}
