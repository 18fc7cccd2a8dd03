use anyhow::Context;
use clap::{Parser, Subcommand};
use pnl_cloud::firebase::{
    AuthBackend, DocumentBackend, FirebaseClient, FirebaseConfig, Identity, Record, RecordId,
    ScopedStore, SessionManager,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SESSION_FILE: &str = ".pnl-session.json";

#[derive(Parser, Debug)]
#[clap(name = "pnl", about = "P&L Manager cloud session and records")]
struct Args {
    #[clap(long, default_value = "pnl.toml")]
    config: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[clap(long)]
        email: String,
        #[clap(long, env = "PNL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Print the signed-in identity
    Whoami,
    /// Print every record of a collection
    List { collection: String },
    /// Add or replace a record, e.g. '{"id": 100, "amount": 50}'
    Add { collection: String, json: String },
    /// Merge fields into an existing record
    Update {
        collection: String,
        id: i64,
        json: String,
    },
    Delete { collection: String, id: i64 },
}

fn load_config(path: &str) -> anyhow::Result<FirebaseConfig> {
    let config = if Path::new(path).exists() {
        FirebaseConfig::from_file(path).with_context(|| format!("read config {}", path))?
    } else {
        FirebaseConfig::default()
    };

    let mut config = config.with_env_overrides();
    if config.session_file.is_none() {
        config = config.with_session_file(DEFAULT_SESSION_FILE);
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_object(json: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(json).context("parse JSON argument")? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("JSON argument must be an object"),
    }
}

async fn run(command: Command, session: &SessionManager, store: &ScopedStore) -> anyhow::Result<()> {
    match command {
        Command::Login { email, password } => match session.login(&email, &password).await {
            Ok(identity) => print_json(&identity),
            Err(failure) => anyhow::bail!("{}", failure.message),
        },
        Command::Logout => {
            session.logout().await.context("sign out")?;
            print_json(&serde_json::json!({ "signed_out": true }))
        }
        Command::Whoami => print_json(&session.current_user()),
        Command::List { collection } => {
            let records: Vec<Record<Map<String, Value>>> = store.get_all(&collection).await?;
            let rows = records
                .iter()
                .map(Record::to_json)
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&rows)
        }
        Command::Add { collection, json } => {
            let record: Record<Map<String, Value>> =
                Record::from_json(Value::Object(parse_object(&json)?))?;
            store.add(&collection, &record).await?;
            print_json(&record.to_json()?)
        }
        Command::Update {
            collection,
            id,
            json,
        } => {
            let patch = parse_object(&json)?;
            store.update(&collection, RecordId(id), &patch).await?;
            print_json(&serde_json::json!({ "updated": id }))
        }
        Command::Delete { collection, id } => {
            store.delete(&collection, RecordId(id)).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pnl_cloud=info,pnl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    let client = Arc::new(FirebaseClient::new(config).context("create Firebase client")?);
    client.restore().await.context("restore session")?;

    let auth: Arc<dyn AuthBackend> = client.clone();
    let docs: Arc<dyn DocumentBackend> = client;
    let session = SessionManager::new(auth.clone());
    let store = ScopedStore::new(auth, docs);

    let _watch = session.observe_state(|identity: Option<&Identity>| match identity {
        Some(identity) => info!("Session active: {}", identity),
        None => info!("No active session"),
    });

    run(args.command, &session, &store).await
}
