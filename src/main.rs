//! st-router: policy routing table daemon
//!
//! This is the main entry point for the daemon. It owns the routing table
//! pool and applies commands received over the IPC socket.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./st-router
//!
//! # Run with custom configuration
//! sudo ./st-router -c /path/to/config.json
//!
//! # Run with environment overrides
//! ST_ROUTER_LOG_LEVEL=debug sudo ./st-router
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use st_router::config::{load_config_with_env, Config};
use st_router::exec::SystemRunner;
use st_router::ipc::{IpcCommand, IpcHandler, IpcResponse, IpcServer};
use st_router::policy::{PolicyController, UidRangeMarkMap};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/st-router/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("st-router v{}", st_router::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"st-router v{}

Per-interface policy routing tables for tethering and VPN.

USAGE:
    st-router [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/st-router/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    ST_ROUTER_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    ST_ROUTER_IPC_SOCKET       Override IPC socket path
    ST_ROUTER_BASE_TABLE       Override the first routing table number
    ST_ROUTER_TABLE_CAPACITY   Override the number of routing tables

REQUIREMENTS:
    - iproute2 and iptables/ip6tables binaries
    - CAP_NET_ADMIN capability (or root)
    - NAT POSTROUTING and mangle OUTPUT chains named in the configuration
"#,
        st_router::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let filter = match "tokio=warn".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        st_router::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("st-router v{}", st_router::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let controller = PolicyController::from_config(
        &config,
        Box::new(SystemRunner),
        Box::new(UidRangeMarkMap::new()),
    );
    info!(
        "Table pool ready: {} tables starting at {}",
        config.tables.capacity, config.tables.base_table_number
    );

    let ipc_handler = Arc::new(IpcHandler::new(controller));
    let ipc_server = IpcServer::new(config.ipc.clone(), Arc::clone(&ipc_handler));
    let ipc_shutdown = ipc_server.shutdown_sender();

    let mut ipc_handle = tokio::spawn(async move { ipc_server.run().await });

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    if !config.ipc.enabled {
        warn!("IPC disabled, tables can only be inspected at shutdown");
    }

    let server_result = tokio::select! {
        result = &mut ipc_handle, if config.ipc.enabled => {
            info!("IPC server stopped");
            Some(result)
        }
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            None
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            None
        }
    };

    info!("Shutting down...");

    let server_result = match server_result {
        Some(result) => result,
        None => {
            let _ = ipc_shutdown.send(());
            match tokio::time::timeout(std::time::Duration::from_secs(5), ipc_handle).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("IPC server did not stop within 5s");
                    Ok(Ok(()))
                }
            }
        }
    };

    // Kernel state is left in place; log what is still installed.
    let listing = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        ipc_handler.handle(IpcCommand::ListTables),
    )
    .await;
    if let Ok(IpcResponse::Tables { tables }) = listing {
        for table in tables {
            info!(
                "Table {} still held by {} ({} rules)",
                table.table_number, table.interface, table.rule_count
            );
        }
    }

    info!("Shutdown complete");

    match server_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("IPC server error: {}", e);
            Err(anyhow::anyhow!("IPC server error: {}", e))
        }
        Err(e) => Err(anyhow::anyhow!("IPC server task failed: {}", e)),
    }
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
