//! tunctl: SOCKS5-backed tunnel control daemon
//!
//! Wires the session controller to a real forwarding engine process and an
//! iproute2-provisioned tun device, runs one session until interrupted.

mod engine;
mod platform;

use anyhow::{bail, Context, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tunctl_core::{
    AllowAllResolver, CacheLayout, ConfigStrategy, ControllerConfig, Preferences,
    SessionController, StatusSink, TrafficMonitor, TrafficUpdate,
};

const TUN_DEVICE: &str = "tun0";

struct Options {
    cache_dir: std::path::PathBuf,
    engine_binary: std::path::PathBuf,
    device: String,
    strategy: ConfigStrategy,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        cache_dir: std::path::PathBuf::from("/var/lib/tunctl"),
        engine_binary: std::path::PathBuf::from("hev-socks5-tunnel"),
        device: TUN_DEVICE.to_string(),
        strategy: ConfigStrategy::Regenerate,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cache-dir" => {
                options.cache_dir = args.next().context("--cache-dir needs a value")?.into();
            }
            "--engine" => {
                options.engine_binary = args.next().context("--engine needs a value")?.into();
            }
            "--device" => {
                options.device = args.next().context("--device needs a value")?;
            }
            "--merge" => options.strategy = ConfigStrategy::Merge,
            "--help" | "-h" => {
                println!(
                    "usage: tunctl [--cache-dir DIR] [--engine BIN] [--device NAME] [--merge]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(options)
}

/// Statistics land on the log for a headless daemon.
struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn notify(&self, update: &TrafficUpdate) {
        info!("Session traffic: {} {}", update.upload, update.download);
    }

    fn refresh(&self, update: &TrafficUpdate) {
        info!("Session traffic: {} {}", update.upload, update.download);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into())),
        )
        .with_target(false)
        .compact()
        .init();

    let options = parse_args()?;

    let layout = CacheLayout::new(&options.cache_dir);
    layout
        .ensure()
        .with_context(|| format!("preparing {}", options.cache_dir.display()))?;
    let prefs = Arc::new(Mutex::new(Preferences::load(layout.prefs_file())));

    let controller = SessionController::new(
        ControllerConfig {
            self_id: "tunctl".to_string(),
            strategy: options.strategy,
        },
        layout.clone(),
        prefs,
        Arc::new(platform::IprouteProvisioner::new(&options.device)),
        Arc::new(AllowAllResolver),
        Arc::new(engine::ProcessEngine::new(
            &options.engine_binary,
            &options.device,
            layout.log_file(),
        )),
    );

    let monitor = TrafficMonitor::new(controller.engine(), Arc::new(LogStatusSink));
    tokio::spawn(monitor.run(controller.running_watch()));

    info!("tunctl starting");
    controller.start().await?;

    let mut events = controller.events();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            controller.stop().await;
        }
        // The engine exiting on its own already drove the stop transition.
        event = async {
            loop {
                match events.recv().await {
                    Ok(tunctl_core::SessionEvent::Stopped) => break Ok(()),
                    Ok(_) => continue,
                    Err(e) => break Err(e),
                }
            }
        } => {
            if event.is_ok() {
                info!("Session ended");
            }
        }
    }

    info!("tunctl shut down");
    Ok(())
}
