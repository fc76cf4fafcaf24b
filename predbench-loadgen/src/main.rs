use clap::{Parser, ValueEnum};
use predbench_client::deadline::{DEFAULT_MAX_TIMERS, DEFAULT_RESOLUTION};
use predbench_client::{Client, ClientConfig, DeadlineCoalescer};
use predbench_loadgen::dispatch::{Dispatcher, RunConfig, Strategy, DEFAULT_TICK};
use predbench_loadgen::report::{render_comparison, Report};
use predbench_loadgen::server::LocalServer;
use predbench_loadgen::workload::{request_factory, DEFAULT_MODEL};
use predbench_server::fault::FaultPolicy;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// One sleeping task per call
    Scheduled,
    /// One coarse ticker issuing due calls in batches
    Ticker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProtocolArg {
    /// HTTP/1.1 with a connection pool
    Http1,
    /// HTTP/2 with prior knowledge
    Http2,
    /// Both, one after the other
    Both,
}

impl ProtocolArg {
    /// `(name, http2_prior_knowledge)` for every protocol to run.
    fn variants(self) -> Vec<(&'static str, bool)> {
        match self {
            ProtocolArg::Http1 => vec![("http1", false)],
            ProtocolArg::Http2 => vec![("http2", true)],
            ProtocolArg::Both => vec![("http1", false), ("http2", true)],
        }
    }
}

#[derive(Parser)]
#[command(name = "predbench-loadgen", about = "Open-loop prediction load generator")]
struct Args {
    /// Target issuance rate (calls per second)
    #[arg(long, default_value_t = 10_000.0)]
    qps: f64,

    /// Number of calls to issue
    #[arg(long, default_value_t = 50_000)]
    iterations: usize,

    /// Per-call deadline (milliseconds); repeat or comma-separate to sweep several
    #[arg(long = "timeout-ms", value_delimiter = ',', default_value = "200")]
    timeouts_ms: Vec<u64>,

    /// Issuance strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Scheduled)]
    strategy: StrategyArg,

    /// Ticker period for the ticker strategy (microseconds)
    #[arg(long, default_value_t = DEFAULT_TICK.as_micros() as u64)]
    tick_us: u64,

    /// Deadline coalescing resolution (microseconds)
    #[arg(long, default_value_t = DEFAULT_RESOLUTION.as_micros() as u64)]
    coalesce_us: u64,

    /// Cap on simultaneously armed deadline timers
    #[arg(long, default_value_t = DEFAULT_MAX_TIMERS)]
    max_timers: usize,

    /// Existing prediction server (host:port); a local one is started when omitted
    #[arg(long)]
    target: Option<String>,

    /// Model name to address
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Client protocol; `both` runs every timeout over each
    #[arg(long, value_enum, default_value_t = ProtocolArg::Http1)]
    protocol: ProtocolArg,

    /// Local server: latency injected into selected calls (milliseconds)
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Local server: fraction of calls that get the injected latency
    #[arg(long, default_value_t = 0.0)]
    latency_rate: f64,

    /// Local server: fraction of calls answered with 500
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Local server: fraction of calls answered with no payload
    #[arg(long, default_value_t = 0.0)]
    empty_rate: f64,

    /// Fail if the success ratio falls below this fraction
    #[arg(long, default_value_t = 0.0)]
    min_success_ratio: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let configs: Vec<RunConfig> = args
        .timeouts_ms
        .iter()
        .map(|&ms| RunConfig::new(args.qps, args.iterations, Duration::from_millis(ms)))
        .collect::<Result<_, _>>()
        .unwrap_or_else(|e| {
            eprintln!("Invalid run configuration: {e}");
            process::exit(3);
        });

    let strategy = match args.strategy {
        StrategyArg::Scheduled => Strategy::ScheduledDelay,
        StrategyArg::Ticker => Strategy::Ticker { tick: Duration::from_micros(args.tick_us) },
    };

    let (local, address) = match &args.target {
        Some(target) => (None, target.clone()),
        None => {
            let policy = FaultPolicy {
                latency_ms: args.latency_ms,
                latency_rate: args.latency_rate,
                failure_rate: args.failure_rate,
                empty_rate: args.empty_rate,
            };
            let server = LocalServer::spawn(policy).await.unwrap_or_else(|e| {
                eprintln!("Failed to start local server: {e}");
                process::exit(3);
            });
            println!("Local server ready on {}", server.addr);
            let address = server.addr.to_string();
            (Some(server), address)
        }
    };

    let mut reports = Vec::new();
    for (protocol, http2) in args.protocol.variants() {
        let mut client_config = ClientConfig::new(address.clone());
        client_config.http2_prior_knowledge = http2;
        let client = Arc::new(Client::new(client_config).unwrap_or_else(|e| {
            eprintln!("Failed to build client: {e}");
            process::exit(3);
        }));

        for config in &configs {
            let label = format!("timeout {} ms, {protocol}", config.timeout.as_millis());
            let coalescer = DeadlineCoalescer::with_settings(Duration::from_micros(args.coalesce_us), args.max_timers);
            let dispatcher = Dispatcher::new(Arc::clone(&client), coalescer);

            println!(
                "Running {} calls at {:.1} qps against {} ({}, {} strategy)",
                config.iterations,
                config.target_qps,
                address,
                label,
                strategy.as_name(),
            );

            let answered_before = local.as_ref().map(LocalServer::answered);
            let outcome = dispatcher.run(config, strategy, request_factory(args.model.clone())).await;
            let answered = local
                .as_ref()
                .zip(answered_before)
                .map(|(server, before)| server.answered() - before);
            let timers = dispatcher.coalescer().stats().timers_created;

            let report = Report::new(label, config, &outcome, answered, timers, args.min_success_ratio);
            println!("{}\n", report.render());
            reports.push(report);
        }
    }
    drop(local);

    if reports.len() > 1 {
        println!("{}", render_comparison(&reports));
    }

    let all_passed = reports.iter().all(Report::passed);
    process::exit(if all_passed { 0 } else { 1 });
}
