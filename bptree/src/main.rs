// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use bptree::TreeConfig;
use bptree::shell::{Command, Outcome, Shell};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration from environment variables
    let config = match TreeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: order={}, snapshot_path={}, checkpoint_interval_secs={}",
        config.order,
        config.snapshot_path.display(),
        config.checkpoint_interval_secs
    );

    let shell = match Shell::open(&config) {
        Ok(shell) => shell,
        Err(e) => {
            tracing::error!("Failed to open snapshot: {e}");
            std::process::exit(1);
        }
    };

    if config.checkpoint_enabled() {
        if let Err(e) = shell
            .tree()
            .start_checkpoint(&config.snapshot_path, config.checkpoint_interval_secs)
        {
            tracing::error!("Failed to start checkpointing: {e}");
            std::process::exit(1);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("failed to read stdin: {e}");
                break;
            }
        };

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => match shell.execute(command) {
                Outcome::Reply(reply) => println!("{reply}"),
                Outcome::Quit => break,
            },
            Err(e) => println!("error: {e}"),
        }
    }

    // No checkpoint starts after this. One already running is serialized
    // with the final save and writes the same entries.
    shell.tree().stop_checkpoint();
    if let Err(e) = shell.save() {
        tracing::error!("Failed to save snapshot: {e}");
        std::process::exit(1);
    }
    tracing::info!("saved snapshot to {}", shell.snapshot_path().display());
}
