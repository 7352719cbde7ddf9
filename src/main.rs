mod cli;

use chunkstream::{config, server, streaming::RangeSpec};
use chunkstream_engine::planner;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting chunkstream server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "chunkstream=trace,chunkstream_engine=trace,chunkstream_common=debug,tower_http=debug"
                .to_string()
        } else {
            "chunkstream=debug,chunkstream_engine=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Plan {
            size,
            chunk_size,
            range,
            json,
        } => print_plan(size, chunk_size, range.as_deref(), json),
        Commands::Version => {
            println!("chunkstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Engine: window {}, workers {}, retries {}, rate-limit budget {}s",
        config.engine.window_size,
        config.engine.worker_count,
        config.engine.transient_retries,
        config.engine.rate_limit_budget_secs
    );
    println!("  Sessions: {}", config.sessions.len());
    for session in &config.sessions {
        match &session.endpoint {
            Some(endpoint) => println!("    {} ({})", session.identity, endpoint),
            None => println!("    {}", session.identity),
        }
    }
    println!(
        "  Store: {:?} ({} byte chunks)",
        config.store.media_dir, config.store.chunk_size
    );
    if let Some(rps) = config.store.requests_per_second {
        println!("    Quota: {} requests/s per session", rps);
    }

    Ok(())
}

fn print_plan(size: u64, chunk_size: u64, range: Option<&str>, json: bool) -> Result<()> {
    let (start, end) = match range {
        Some(raw) => {
            let window = RangeSpec::parse(raw)
                .with_context(|| format!("Malformed range: {}", raw))?
                .resolve(size)?;
            (window.start, Some(window.end))
        }
        None => (0, None),
    };

    let plan = planner::plan(size, chunk_size, start, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let total: u64 = plan.iter().map(|d| d.length).sum();
    println!(
        "Object: {} bytes, {} chunks of {} bytes",
        size,
        planner::chunk_count(size, chunk_size),
        chunk_size
    );
    println!("Descriptors: {} ({} bytes)", plan.len(), total);
    for descriptor in &plan {
        println!(
            "  chunk {:>6}  offset {:>10}  length {:>10}",
            descriptor.chunk_index, descriptor.offset_in_chunk, descriptor.length
        );
    }

    Ok(())
}
