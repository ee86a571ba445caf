/**
 * MIT License
 *
 * Copyright (c) 2025 Takatoshi Kondo
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */
use anyhow::anyhow;
use clap::Parser;
use mqtt_edge_broker::auth::{AllowAllAuthenticator, Authenticator, PasswordAuthenticator};
use mqtt_edge_broker::config::{BrokerConfig, ListenerConfig};
use mqtt_edge_broker::tracing_setup::{init_tracing, parse_level};
use mqtt_edge_broker::Context;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "mqtt-broker")]
#[command(about = "MQTT Broker with configurable worker threads and logging")]
struct Args {
    /// Path to the JSON configuration file (defaults to ./mqtt.json if present)
    #[arg(long)]
    config: Option<String>,

    /// Number of worker threads for async tasks
    #[arg(long)]
    worker_threads: Option<usize>,

    /// Number of blocking threads for blocking operations
    #[arg(long)]
    max_blocking_threads: Option<usize>,

    /// Thread stack size in bytes
    #[arg(long)]
    thread_stack_size: Option<usize>,

    /// Log level, overrides `log.level` of the configuration
    #[arg(long)]
    #[arg(value_parser = ["error", "warn", "info", "debug", "trace"])]
    log_level: Option<String>,

    /// Port of the plain TCP listener
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Password file; clients are accepted unconditionally without one
    #[arg(long)]
    auth_file: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let worker_threads = args.worker_threads.unwrap_or_else(num_cpus::get);

    // Build custom tokio runtime
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.worker_threads(worker_threads).enable_all();

    if let Some(max_blocking) = args.max_blocking_threads {
        runtime_builder.max_blocking_threads(max_blocking);
    }

    if let Some(stack_size) = args.thread_stack_size {
        runtime_builder.thread_stack_size(stack_size);
    }

    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(worker_threads, args))
}

async fn async_main(worker_threads: usize, args: Args) -> anyhow::Result<()> {
    let mut config = BrokerConfig::load_or_default(args.config.as_deref())?;
    if let Some(port) = args.tcp_port {
        override_tcp_port(&mut config, port);
    }

    let log_level = parse_level(args.log_level.as_deref().unwrap_or(&config.log.level))?;
    let _guard = init_tracing(log_level)?;

    info!("Starting MQTT Broker with log level: {log_level}");
    info!("Tokio runtime configuration:");
    info!("  --worker-threads        {worker_threads}");
    info!(
        "  --max-blocking-threads  {}",
        args.max_blocking_threads
            .map_or("None".to_string(), |v| v.to_string())
    );
    info!(
        "  --thread-stack-size     {}",
        args.thread_stack_size
            .map_or("None".to_string(), |v| v.to_string())
    );

    let authenticator: Arc<dyn Authenticator> = match args.auth_file.as_ref().or(config.auth_file.as_ref()) {
        Some(path) => {
            info!("Loading authentication entries from {path}");
            Arc::new(PasswordAuthenticator::load_json(path)?)
        }
        None => Arc::new(AllowAllAuthenticator),
    };

    let context = Context::new(authenticator, config.workers.unwrap_or(worker_threads));
    let started = context.start_listeners(&config.listeners).await;
    if started.is_empty() {
        return Err(anyhow!("No listener could be started"));
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    context.shutdown().await;

    Ok(())
}

/// Point the first plain listener at `port`, adding one if there is none
fn override_tcp_port(config: &mut BrokerConfig, port: u16) {
    match config.listeners.iter_mut().find(|l| l.tls.is_none()) {
        Some(listener) => listener.port = port,
        None => config
            .listeners
            .push(ListenerConfig::tcp("0.0.0.0", port)),
    }
}
