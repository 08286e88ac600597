//! CLI for RelayStore
//!
//! Subcommands:
//! - `stats`: print message counts per delivery state
//! - `purge`: run one stale-message sweep
//! - `run`: keep the housekeeper running until Ctrl-C
//! - `demo`: enqueue messages and drain them through a simulated publisher

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relaystore::config::{Settings, load_config};
use relaystore::store::MessageCounts;
use relaystore::utils::logging;
use relaystore::{DeliveryToken, Housekeeper, MessageStore, Qos, StoreProvider};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "relaystore")]
enum Command {
    /// Print message counts per delivery state
    Stats {
        #[arg(long, default_value = "outbox")]
        store: String,
    },
    /// Delete completed messages older than the purge age
    Purge {
        #[arg(long, default_value = "outbox")]
        store: String,
        /// Purge age in seconds (defaults to the configured one)
        #[arg(long)]
        age: Option<u64>,
    },
    /// Run the housekeeper until interrupted
    Run {
        #[arg(long, default_value = "outbox")]
        store: String,
    },
    /// Enqueue messages and drain them with a simulated publisher session
    Demo {
        #[arg(long, default_value = "outbox")]
        store: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.log.level);

    if let Err(e) = run(cmd, config).await {
        error!("relaystore failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cmd: Command, config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let provider = StoreProvider::open(&config.store)?;
    let capacity = config.store.capacity;

    match cmd {
        Command::Stats { store } => {
            let store = provider.open_message_store(&store, capacity)?;
            print_counts(&store.get_message_counts()?);
        }
        Command::Purge { store, age } => {
            let store = provider.open_message_store(&store, capacity)?;
            let age = age.unwrap_or(config.housekeeper.purge_age_secs);
            let purged = store.delete_stale_messages(Duration::from_secs(age))?;
            println!("purged {purged} message(s) older than {age}s");
        }
        Command::Run { store } => {
            let store = provider.open_message_store(&store, capacity)?;
            let (handle, shutdown) =
                Housekeeper::from_settings(Arc::clone(&store), &config.housekeeper).spawn();

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received. Exiting gracefully.");
            let _ = shutdown.send(true);
            handle.await?;
        }
        Command::Demo { store, count } => {
            let store = provider.open_message_store(&store, capacity)?;
            demo(&store, count)?;
            print_counts(&store.get_message_counts()?);
        }
    }

    provider.close_all()?;
    Ok(())
}

fn print_counts(counts: &MessageCounts) {
    println!("unpublished: {}", counts.unpublished);
    println!("in flight:   {}", counts.in_flight);
    println!("published:   {}", counts.published);
    println!("confirmed:   {}", counts.confirmed);
    println!("dropped:     {}", counts.dropped);
    println!("total:       {}", counts.total());
}

/// Fill the store, then drain it the way a publisher loop would. Halfway
/// through the connection "drops": in-flight messages are requeued and
/// redelivered under a new session.
fn demo(store: &MessageStore, count: usize) -> relaystore::Result<()> {
    for i in 0..count {
        let qos = if i % 3 == 0 { Qos::AtMostOnce } else { Qos::AtLeastOnce };
        let priority = (i % 4) as i32;
        let payload = format!("reading {i}");
        store.store("demo/telemetry", payload.as_bytes(), qos, false, priority)?;
    }

    let mut session = Uuid::new_v4().to_string();
    let mut sequence = 0i64;
    let mut awaiting_ack = Vec::new();
    let mut reconnected = false;

    while let Some(msg) = store.get_next_message()? {
        info!(id = msg.id, priority = msg.priority, topic = %msg.topic, "sending");
        if msg.qos.requires_ack() {
            sequence += 1;
            store.mark_as_published_with_token(msg.id, DeliveryToken::new(sequence, session.as_str()))?;
            awaiting_ack.push(msg.id);
        } else {
            store.mark_as_published(msg.id)?;
        }

        if !reconnected && awaiting_ack.len() >= 2 {
            warn!(session = %session, "connection lost, requeueing in-flight messages");
            store.unpublish_all_in_flight_messages()?;
            awaiting_ack.clear();
            session = Uuid::new_v4().to_string();
            reconnected = true;
        }
    }

    for id in awaiting_ack {
        store.mark_as_confirmed(id)?;
    }
    Ok(())
}
