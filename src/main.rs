// src/main.rs - Kiosk entry point: config, logging, session and terminal display
use std::path::PathBuf;

use c3dp_kiosk::config;
use c3dp_kiosk::session::spawn_operator_input;
use c3dp_kiosk::{DisplayModel, KioskCommand, KioskSession};
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;

/// Connect3Dp kiosk CLI
#[derive(Parser, Debug)]
#[command(name = "c3dp-kiosk", about = "Shows live Connect3Dp machine status on a kiosk display.")]
struct Cli {
    /// Path to the kiosk TOML config file
    #[arg(default_value = "kiosk.toml")]
    config: PathBuf,

    /// Override machine.id from the config file
    #[arg(long)]
    machine_id: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    tracing::info!("Starting Connect3Dp kiosk");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.to_string_lossy().to_string();
    tracing::info!("Loading configuration from: {}", config_path);

    let mut config = config::load_config(&config_path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", config_path, e);
        tracing::error!("Please ensure the configuration file exists and is properly formatted");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    if let Some(id) = cli.machine_id {
        config.machine.id = id;
    }
    config.validate()?;

    tracing::info!("Server: {}", config.server.url());
    tracing::info!("Machine: {}", config.machine.id);

    let (command_tx, command_rx) = mpsc::channel::<KioskCommand>(16);
    let session = KioskSession::new(config.clone(), command_rx);
    let state = session.state();
    let stats = session.stats();
    let mut session_task = tokio::spawn(session.run());

    // Render whenever the derived model changes.
    let machine_id = config.machine.id.clone();
    let display = config.display.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(display.refresh_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last: Option<DisplayModel> = None;
        loop {
            interval.tick().await;
            let model = DisplayModel::from_state(&*state.read().await, &machine_id);
            if last.as_ref() != Some(&model) {
                println!("\n{}", model);
                if display.dev_stats {
                    println!("{}", stats.read().await.summary(Utc::now()));
                }
                last = Some(model);
            }
        }
    });

    // Stand-in for the touch button: "i" + Enter marks a finished print as idle.
    // Read on an OS thread; tokio's stdin would keep the runtime alive after Ctrl-C.
    spawn_operator_input(std::io::BufReader::new(std::io::stdin()), command_tx.clone());

    tokio::select! {
        result = &mut session_task => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
        }
    }

    let _ = command_tx.send(KioskCommand::Shutdown).await;
    session_task.await??;
    Ok(())
}
