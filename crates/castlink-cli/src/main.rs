//! castlink CLI — demo front-end for the presentation engine.
//!
//! Runs everything in-process over the loopback mechanism: real deployments
//! register their own transport mechanisms instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use castlink_core::{Config, Connection, FirstDisplayChooser, Presentation};
use castlink_mechanism::LoopbackMechanism;
use castlink_types::{ConnectionState, DisplayKind, PresentOptions};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "castlink",
    about = "Present content on a second display",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List displays able to present a URL.
    Displays {
        /// Presentation URL.
        url: String,
    },

    /// Present a URL on the first available display and exchange a message
    /// with the receiving side.
    Present {
        /// Presentation URL.
        url: String,

        /// Message to send once connected.
        #[arg(short, long, default_value = "hello from castlink")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Displays { url } => cmd_displays(config, &url).await,
        Commands::Present { url, message } => cmd_present(config, &url, &message).await,
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => Config::default_path()
            .unwrap_or_else(|| PathBuf::from("castlink.toml")),
    };
    Ok(Config::load(&path)?)
}

fn presentation_with_loopback(config: Config) -> Presentation {
    let display_name = config.identity.name.clone();
    let capacity = config.engine.channel_capacity;
    let presentation = Presentation::new(config);
    presentation.register_mechanism(Arc::new(LoopbackMechanism::new(display_name, capacity)));
    presentation
}

async fn cmd_displays(config: Config, url: &str) -> anyhow::Result<()> {
    let presentation = presentation_with_loopback(config);
    let presenter = presentation.presenter(
        url,
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );

    let displays = presenter.available_displays().await;
    if displays.is_empty() {
        println!("no displays available for {url}");
        return Ok(());
    }
    for display in displays {
        let kind = match display.kind {
            DisplayKind::Concrete => "device",
            DisplayKind::Class => "device class",
        };
        println!("{}  ({kind}, via {})", display.name, display.mechanism);
    }
    Ok(())
}

async fn cmd_present(config: Config, url: &str, message: &str) -> anyhow::Result<()> {
    let presentation = presentation_with_loopback(config);

    // Start the receiving side first so the loopback launch is picked up.
    let receiver = presentation.receiver().await;

    let presenter = presentation.presenter(
        url,
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    tracing::info!(url, "starting presentation");
    let connection = presenter.start().await?;
    println!("presentation started (connection {})", connection.id());

    let receiver_conn = tokio::time::timeout(Duration::from_secs(5), receiver.connection())
        .await
        .map_err(|_| anyhow::anyhow!("receiving side never saw the launch"))?;

    // Echo whatever the controller sends.
    let echo = receiver_conn.clone();
    receiver_conn.set_on_message(move |payload| {
        println!("receiver got: {payload:?}");
        let _ = echo.send("ack");
    });

    wait_connected(&connection).await?;
    wait_connected(&receiver_conn).await?;

    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    connection.set_on_message(move |payload| {
        let _ = tx.try_send(payload);
    });

    connection.send(message)?;
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(reply)) => println!("controller got: {reply:?}"),
        _ => println!("no reply from the receiving side"),
    }

    connection.terminate().await;
    println!("presentation terminated");
    Ok(())
}

async fn wait_connected(connection: &Connection) -> anyhow::Result<()> {
    let mut rx = connection.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow_and_update() == ConnectionState::Connected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("connection {} never connected", connection.id()))
}
