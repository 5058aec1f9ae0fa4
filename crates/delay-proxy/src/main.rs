use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use delay_proxy::config::{self, ConfigBuilder, PartialConfig};
use delay_proxy::ProxyOrchestrator;
use delay_proxy_queue::DelaySetting;

/// Framed-TCP delay proxy.
#[derive(Debug, Parser)]
#[command(name = "delay-proxy", version)]
struct Args {
    /// Path to a flat key=value configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to accept upstream frames on. Overrides the config file and
    /// environment.
    #[arg(long)]
    ingress_port: Option<u16>,

    /// Port downstream clients connect to for delayed frames. Overrides
    /// the config file and environment.
    #[arg(long)]
    egress_port: Option<u16>,

    /// Initial hold time in seconds. Absent means no delay.
    #[arg(long)]
    hold_secs: Option<f64>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut builder = ConfigBuilder::new();
    if let Some(path) = &args.config {
        builder.apply(config::from_file(path));
    }
    builder.apply(config::from_env());
    builder.apply(PartialConfig {
        ingress_port: args.ingress_port,
        egress_port: args.egress_port,
        initial_hold_secs: args.hold_secs,
    });

    let config = match builder.build() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let delay_setting = Arc::new(DelaySetting::with_override(config.initial_hold_secs));
    let mut proxy = ProxyOrchestrator::new(delay_setting);

    if let Err(e) = proxy.start(config.ingress_port, config.egress_port) {
        tracing::error!(error = %e, "failed to start proxy");
        std::process::exit(1);
    }
    tracing::info!(
        ingress_port = config.ingress_port,
        egress_port = config.egress_port,
        "proxy running"
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .expect("failed to install ctrl-c handler");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutting down");
    proxy.stop();
}
