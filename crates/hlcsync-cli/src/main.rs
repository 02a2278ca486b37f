//! # hlcsync CLI
//!
//! Drive a local replica from the shell: write cells, read them back,
//! inspect the clock, and push state to the configured sync peer.
//!
//! Configuration comes from `HLCSYNC_*` environment variables.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hlcsync_core::{Batch, CellKey, NewMutation, Timestamp, Value};
use hlcsync_replica::{
    start_sync, MemoryStore, Replica, ReplicaConfig, SqliteStore, Storage, StoreKind,
};
use std::env;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "ts-encode" => {
            if args.len() < 5 {
                eprintln!("Usage: hlcsync ts-encode <millis> <counter> <node-uuid>");
                std::process::exit(1);
            }
            let millis = args[2].parse().context("Invalid millis")?;
            let counter = args[3].parse().context("Invalid counter")?;
            let node_id = Uuid::parse_str(&args[4]).context("Invalid node id")?;
            println!("{}", Timestamp::new(millis, counter, node_id));
        }
        "ts-decode" => {
            if args.len() < 3 {
                eprintln!("Usage: hlcsync ts-decode <timestamp>");
                std::process::exit(1);
            }
            let timestamp = Timestamp::decode(&args[2]).context("Failed to decode")?;
            println!("millis:  {}", timestamp.millis);
            println!("counter: {}", timestamp.counter);
            println!("node:    {}", timestamp.node_id);
            if let Some(datetime) = timestamp.datetime() {
                println!("time:    {}", datetime.to_rfc3339());
            }
        }
        "init" | "send" | "get" | "clock" | "resync" => {
            let config = ReplicaConfig::from_env().context("Failed to load configuration")?;
            match config.persistence.store_type {
                StoreKind::Sqlite => {
                    let store = SqliteStore::open(&config.persistence.db_path)
                        .context("Failed to open SQLite store")?;
                    run(store, &config, &args[1..]).await?;
                }
                StoreKind::Memory => run(MemoryStore::new(), &config, &args[1..]).await?,
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run<S: Storage>(store: S, config: &ReplicaConfig, args: &[String]) -> Result<()> {
    let mut builder = Replica::builder(store)
        .owner(config.owner.clone())
        .sync_url(config.sync.sync_url.clone())
        .max_drift_ms(config.max_drift_ms);
    if let Some(node_id) = config.node_id {
        builder = builder.node_id(node_id);
    }

    let needs_sync = matches!(args[0].as_str(), "send" | "resync");
    let mut responses = None;
    if needs_sync {
        let handle = start_sync(
            &config.sync,
            &config.owner,
            config.node_id.unwrap_or_else(Uuid::new_v4),
        )
        .await?;
        builder = builder.transport(Arc::clone(&handle.transport));
        responses = handle.responses;
    }

    let replica = builder.open().context("Failed to open replica")?;

    match args[0].as_str() {
        "init" => {
            println!("{}", replica.node_id());
        }
        "send" => {
            let batch = parse_batch(&args[1..])?;
            let count = batch.len();
            replica.send(batch, Vec::new(), Vec::new()).await?;
            let clock = replica.clock().await?;
            println!("sent {count} mutation(s), clock {}", clock.timestamp);

            if let Some(mut responses) = responses {
                match tokio::time::timeout(config.sync.timeout, responses.recv()).await {
                    Ok(Some(received)) => {
                        let outcome = replica.receive(received).await?;
                        println!(
                            "sync: applied {} remote mutation(s), {:?}",
                            outcome.applied, outcome.divergence
                        );
                    }
                    Ok(None) | Err(_) => tracing::warn!("No sync response received"),
                }
            }
        }
        "get" => {
            if args.len() < 4 {
                eprintln!("Usage: hlcsync get <table> <row> <column>");
                std::process::exit(1);
            }
            let key = CellKey::new(args[1].as_str(), args[2].as_str(), args[3].as_str());
            match replica.value(&key).await? {
                Some(register) => println!(
                    "{}",
                    serde_json::json!({
                        "value": render_value(&register.value),
                        "timestamp": register.timestamp.encode(),
                    })
                ),
                None => println!("null"),
            }
        }
        "clock" => {
            let clock = replica.clock().await?;
            println!("node:      {}", replica.node_id());
            println!("timestamp: {}", clock.timestamp);
            println!("digest:    {:016x}", clock.digest.hash());
            println!("mutations: {}", clock.digest.len());
        }
        "resync" => {
            replica.resync().await?;
            // Give the worker a chance to deliver before the runtime shuts down.
            if let Some(mut responses) = responses {
                if let Ok(Some(received)) =
                    tokio::time::timeout(config.sync.timeout, responses.recv()).await
                {
                    let outcome = replica.receive(received).await?;
                    println!("sync: {:?}", outcome.divergence);
                }
            }
        }
        _ => unreachable!("dispatched commands only"),
    }

    Ok(())
}

/// Turn `<table> <row> <column> <value>` groups into a batch.
fn parse_batch(args: &[String]) -> Result<Batch> {
    if args.is_empty() || args.len() % 4 != 0 {
        bail!("Usage: hlcsync send <table> <row> <column> <value> [<table> <row> <column> <value> ...]");
    }
    let writes = args
        .chunks(4)
        .map(|group| {
            Ok(NewMutation::new(
                group[0].as_str(),
                group[1].as_str(),
                group[2].as_str(),
                parse_value(&group[3])?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Batch::try_from(writes)?)
}

/// `b64:` prefix for blobs, then JSON scalars, then plain text.
fn parse_value(raw: &str) -> Result<Value> {
    if let Some(encoded) = raw.strip_prefix("b64:") {
        let bytes = BASE64.decode(encoded).context("Invalid base64 blob")?;
        return Ok(Value::Blob(bytes));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) if !json.is_array() && !json.is_object() => Ok(Value::from_json(&json)),
        _ => Ok(Value::Text(raw.to_string())),
    }
}

fn render_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Blob(bytes) => serde_json::Value::from(format!("b64:{}", BASE64.encode(bytes))),
        other => other.to_json(),
    }
}

fn print_help() {
    println!(
        r#"hlcsync CLI

USAGE:
    hlcsync <COMMAND> [OPTIONS]

COMMANDS:
    init                                  Seed the replica clock and print the node id
    send <table> <row> <column> <value>   Commit one or more writes (groups of four) and sync
    get <table> <row> <column>            Print a cell value and its timestamp
    clock                                 Print the replica clock and digest
    resync                                Push the persisted clock to the sync peer
    ts-encode <millis> <counter> <node>   Encode a timestamp
    ts-decode <timestamp>                 Decode a timestamp
    help                                  Show this help message

VALUES:
    JSON scalars (42, 1.5, true, null, "quoted"), b64:<base64> for blobs,
    anything else is stored as text.

ENVIRONMENT:
    HLCSYNC_STORE        sqlite | memory (default sqlite)
    HLCSYNC_DB_PATH      SQLite file (default ./hlcsync.db)
    HLCSYNC_TRANSPORT    http | mqtt | none (default none)
    HLCSYNC_SYNC_URL     Sync peer endpoint for http
    HLCSYNC_MQTT_BROKER  Broker URL for mqtt
    HLCSYNC_SYNC_TIMEOUT_MS  Request timeout and response wait (default 5000)
    HLCSYNC_OWNER_ID     Owner identity
    HLCSYNC_NODE_ID      Node id for a fresh store
    HLCSYNC_MAX_DRIFT_MS Tolerated clock drift (default 60000)

EXAMPLES:
    hlcsync send todos r1 title "buy milk" todos r1 done false
    hlcsync get todos r1 title
    hlcsync ts-decode 0000018bcfe56800-0000-6f1c0b7e2d8a4b0c9e3f5a7d1c2b4e6f
"#
    );
}
