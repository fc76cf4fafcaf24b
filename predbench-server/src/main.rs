use clap::Parser;
use predbench_server::config::DEFAULT_PORT;
use predbench_server::fault::FaultPolicy;
use predbench_server::{Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "predbench-server", about = "Echo prediction service with fault injection")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to bind; 0 picks a free one.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path to a JSON file containing the FaultPolicy.
    #[arg(long)]
    fault_policy: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let policy = match &args.fault_policy {
        Some(path) => FaultPolicy::from_file(path)?,
        None => FaultPolicy::none(),
    };

    let config = ServerConfig {
        address: SocketAddr::new(args.host, args.port),
        policy,
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // Print "Listening on <addr>" once the server signals it is bound.
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            println!("Listening on {}", addr);
        }
    });

    Server::new(config).run(ready_tx).await?;
    Ok(())
}
