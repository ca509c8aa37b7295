//! Pairio server and command-line client
//!
//! ## Usage
//!
//! ```bash
//! # Start the server
//! pairio serve --config /etc/pairio/pairio.json --port 20443
//!
//! # Talk to it
//! export PAIRIO_URL=http://localhost:20443 PAIRIO_CHANNEL=lab PAIRIO_PASSWORD=secret
//! pairio set default mykey myvalue
//! pairio get default mykey
//! pairio get default '{"run":7}' --json-key --get-from local-then-remote
//! pairio probe
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pairio_core::{
    AdmissionEngine, ChannelRegistry, EngineConfig, PairioConfig, SignatureAlgorithm,
};
use pairio_server::{
    create_storage, GetFrom, Key, LocalStore, PairioClient, PairioServer, ServerConfig, SetTo,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "pairio")]
#[command(author, version, about = "Pairio - quota-regulated key/value store")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PAIRIO_LOG_LEVEL", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve(ServeArgs),

    /// Fetch a value
    Get {
        collection: String,
        key: String,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Store a value
    Set {
        collection: String,
        key: String,
        value: String,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Check that a server is reachable
    Probe {
        /// Server URL
        #[arg(long, env = "PAIRIO_URL", default_value = "http://localhost:20443")]
        url: String,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Channel configuration file
    #[arg(long, env = "PAIRIO_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory containing pairio.json
    #[arg(long, env = "PAIRIO_DIR")]
    dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "20443")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Signature digest (sha256, sha1)
    #[arg(long, env = "PAIRIO_SIGNATURE_ALGORITHM", default_value = "sha256")]
    signature_algorithm: SignatureAlgorithm,

    /// Secret accepted in place of any signature (testing only)
    #[arg(long, env = "PAIRIO_TEST_SIGNATURE", hide_env_values = true)]
    test_signature: Option<String>,

    /// Honor the test signature
    #[arg(long, env = "PAIRIO_ALLOW_TEST_SIGNATURE")]
    allow_test_signature: bool,

    /// Seconds a deferred request may wait for a slot
    #[arg(long, default_value = "30")]
    max_deferral_wait_secs: u64,

    /// Milliseconds to stall a request with a bad signature
    #[arg(long, default_value = "1000")]
    auth_penalty_ms: u64,

    /// Serve per-collection counters on /stats (lists channel names)
    #[arg(long, env = "PAIRIO_EXPOSE_STATS")]
    expose_stats: bool,
}

#[derive(Args)]
struct ClientArgs {
    /// Server URL
    #[arg(long, env = "PAIRIO_URL", default_value = "http://localhost:20443")]
    url: String,

    /// Channel name (needed for remote reads and writes)
    #[arg(long, env = "PAIRIO_CHANNEL", default_value = "")]
    channel: String,

    /// Channel password (needed for remote reads and writes)
    #[arg(long, env = "PAIRIO_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// Signature digest (sha256, sha1)
    #[arg(long, env = "PAIRIO_SIGNATURE_ALGORITHM", default_value = "sha256")]
    signature_algorithm: SignatureAlgorithm,

    /// Send the key as given instead of its SHA-1 digest
    #[arg(long)]
    raw_key: bool,

    /// Parse the key as JSON and address it by its canonical digest
    #[arg(long)]
    json_key: bool,

    /// Where to read (local, remote, local_then_remote, remote_then_local)
    #[arg(long, env = "PAIRIO_GET_FROM", default_value = "remote")]
    get_from: GetFrom,

    /// Where to write (local, remote, local_and_remote)
    #[arg(long, env = "PAIRIO_SET_TO", default_value = "remote")]
    set_to: SetTo,

    /// Local database directory [default: ~/.pairio]
    #[arg(long, env = "PAIRIO_DB_PATH")]
    db_path: Option<PathBuf>,
}

impl ClientArgs {
    fn client(&self) -> PairioClient {
        let db_path = self.db_path.clone().unwrap_or_else(LocalStore::default_path);
        let client = PairioClient::new(&self.url, &self.channel, &self.password)
            .with_algorithm(self.signature_algorithm)
            .with_local_store(LocalStore::new(db_path))
            .with_get_from(self.get_from)
            .with_set_to(self.set_to);
        if self.raw_key {
            client.with_raw_keys()
        } else {
            client
        }
    }

    fn key(&self, key: &str) -> anyhow::Result<Key> {
        if self.json_key {
            let value: serde_json::Value =
                serde_json::from_str(key).with_context(|| format!("parsing JSON key {}", key))?;
            Ok(Key::Json(value))
        } else {
            Ok(Key::from(key))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Get {
            collection,
            key,
            client,
        } => match client.client().get(&collection, client.key(&key)?).await? {
            Some(value) => {
                println!("{}", value);
                Ok(())
            }
            None => anyhow::bail!("Not found: {}/{}", collection, key),
        },
        Commands::Set {
            collection,
            key,
            value,
            client,
        } => {
            client
                .client()
                .set(&collection, client.key(&key)?, &value)
                .await?;
            println!("✓ Stored {}/{}", collection, key);
            Ok(())
        }
        Commands::Probe { url } => {
            PairioClient::new(url.as_str(), "", "").probe().await?;
            println!("✓ Pairio server at {} is reachable", url);
            Ok(())
        }
    }
}

fn load_config(args: &ServeArgs) -> anyhow::Result<PairioConfig> {
    match (&args.config, &args.dir) {
        (Some(path), _) => PairioConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        (None, Some(dir)) => PairioConfig::load_from_dir(dir)
            .with_context(|| format!("loading configuration from {}", dir.display())),
        (None, None) => anyhow::bail!("Missing configuration: pass --config or set PAIRIO_DIR"),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let registry = ChannelRegistry::from_config(&config)?;

    let mut engine_config = EngineConfig::default()
        .with_signature_algorithm(args.signature_algorithm)
        .with_auth_penalty(Duration::from_millis(args.auth_penalty_ms));
    if let Some(secret) = &args.test_signature {
        engine_config = engine_config.with_test_signature(secret.clone(), args.allow_test_signature);
    }
    let engine = AdmissionEngine::new(registry, engine_config);

    let server_config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        max_deferral_wait: Duration::from_secs(args.max_deferral_wait_secs),
        expose_stats: args.expose_stats,
        ..Default::default()
    };
    let storage = create_storage(&server_config.storage);

    let addr: SocketAddr = format!("{}:{}", server_config.host, server_config.port).parse()?;
    info!("Starting Pairio on http://{}", addr);
    info!("API endpoints:");
    info!("  GET  /get/{{collection}}/{{key}}?channel=&signature=");
    info!("  GET  /set/{{collection}}/{{key}}/{{value}}?channel=&signature=");
    info!("  GET  /probe, /health");
    if server_config.expose_stats {
        info!("  GET  /stats");
    }

    PairioServer::new(engine, storage, server_config).run(addr).await
}
