// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firehose Nozzle CLI
//!
//! Streams platform telemetry from the firehose into InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! firehose-nozzle --config config/firehose-nozzle.toml
//!
//! # Verbose logging to a file
//! firehose-nozzle --config nozzle.toml --debug --log-file nozzle.log
//!
//! # Generate an example configuration
//! firehose-nozzle gen-config --output nozzle.toml
//!
//! # Check a configuration (environment overrides applied)
//! firehose-nozzle validate --config nozzle.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use firehose_nozzle::auth::{StaticToken, TokenFetcher, UaaTokenFetcher};
use firehose_nozzle::sink::InfluxHttpSink;
use firehose_nozzle::transport::StreamTransport;
use firehose_nozzle::{Nozzle, NozzleConfig};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Firehose to InfluxDB nozzle
#[derive(Parser, Debug)]
#[command(name = "firehose-nozzle")]
#[command(about = "Firehose Nozzle - streams platform telemetry into InfluxDB")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/firehose-nozzle.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "firehose-nozzle.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.debug, args.log_file.as_deref())?;

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(&output),
            Commands::Validate { config } => cmd_validate(&config),
        };
    }

    let config = NozzleConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let sink = InfluxHttpSink::from_config(&config)?;
    let transport = StreamTransport::for_endpoint(&config.traffic_controller_url)?;
    if config.disable_access_control {
        run_nozzle(Nozzle::new(config, transport, sink, StaticToken::default())).await
    } else {
        let auth = UaaTokenFetcher::from_config(&config)?;
        run_nozzle(Nozzle::new(config, transport, sink, auth)).await
    }
}

async fn run_nozzle<A: TokenFetcher>(
    mut nozzle: Nozzle<StreamTransport, InfluxHttpSink, A>,
) -> anyhow::Result<()> {
    let shutdown = nozzle.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, draining");
            shutdown.shutdown();
        }
    });

    nozzle.run().await?;
    Ok(())
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn cmd_gen_config(output: &Path) -> anyhow::Result<()> {
    let config = NozzleConfig {
        uaa_url: "https://uaa.example.com".into(),
        username: "firehose-nozzle".into(),
        password: "changeme".into(),
        traffic_controller_url: "wss://doppler.example.com:443".into(),
        influxdb_url: "http://localhost:8086".into(),
        influxdb_database: "cloudfoundry".into(),
        deployment: "cf".into(),
        ..NozzleConfig::default()
    };

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# Firehose Nozzle Configuration
# Generated by firehose-nozzle gen-config
# Every key can be overridden by a NOZZLE_* environment variable,
# e.g. NOZZLE_INFLUXDBPASSWORD.

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    match NozzleConfig::from_file(config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Firehose:      {}", config.traffic_controller_url);
            println!("Subscription:  {}", config.firehose_subscription_id);
            println!(
                "InfluxDB:      {} (database {})",
                config.influxdb_url, config.influxdb_database
            );
            println!("Flush every:   {}s", config.flush_duration_seconds);
            if config.disable_access_control {
                println!("Access control disabled");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
