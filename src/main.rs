//! profile-sync: command-line front end for the profile sync core
//!
//! `serve` runs the sync coordinator (queue drains, retention, connectivity
//! probing) until Ctrl-C. The other subcommands perform one operation
//! against the configured stores and print JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use profile_sync::config::Config;
use profile_sync::store::{BackingStore, LocalStore, RemoteStore, StoreId, StoreSet};
use profile_sync::sync::{probe_connectivity, RetentionPolicy, SyncCoordinator, SyncQueue};
use profile_sync::{CacheConfig, ContactInfo, Platform, ProfilePatch, ProfileStore, Session, Theme};

#[derive(Parser)]
#[command(name = "profile-sync")]
#[command(about = "Redundant multi-store persistence and sync for user profiles")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "profile-sync.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "PROFILE_SYNC_DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync coordinator until interrupted (default)
    Serve,

    /// Print the freshest copy of a profile
    Get { user_id: String },

    /// Apply a partial edit to a profile
    Update {
        user_id: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        /// Photo reference (URL or storage path)
        #[arg(long, conflicts_with = "clear_photo")]
        photo: Option<String>,
        #[arg(long)]
        clear_photo: bool,
        /// `platform=url`, repeatable; replaces all links
        #[arg(long = "link")]
        links: Vec<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        website: Option<String>,
        /// light | dark
        #[arg(long)]
        theme: Option<String>,
    },

    /// Find a profile by username
    Lookup { username: String },

    /// List pending retry-queue entries
    Queue,

    /// Drain the retry queue once
    Drain,
}

struct Runtime {
    db: sled::Db,
    store: Arc<ProfileStore>,
    queue: Arc<SyncQueue>,
    local: Option<Arc<LocalStore>>,
    primary: Option<Arc<RemoteStore>>,
}

impl Runtime {
    fn open(config: &Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.node.data_dir).with_context(|| {
            format!("creating data dir {}", config.node.data_dir.display())
        })?;
        let db = sled::open(config.db_path())
            .with_context(|| format!("opening {}", config.db_path().display()))?;

        let mut stores: Vec<Arc<dyn BackingStore>> = Vec::new();

        let local = if config.local.enabled {
            let local = Arc::new(LocalStore::new(&db, config.local.quota_bytes)?);
            stores.push(local.clone());
            Some(local)
        } else {
            None
        };

        let primary = match config.remotes.primary {
            Some(ref remote) => {
                let primary = Arc::new(RemoteStore::new(StoreId::Primary, remote)?);
                stores.push(primary.clone());
                Some(primary)
            }
            None => None,
        };

        if let Some(ref remote) = config.remotes.secondary {
            stores.push(Arc::new(RemoteStore::new(StoreId::Secondary, remote)?));
        }

        let stores = StoreSet::new(stores, config.sync.store_timeout())?;
        let queue = Arc::new(SyncQueue::new(&db, stores.clone(), config.sync.retry_ceiling)?);
        let store = Arc::new(ProfileStore::new(
            stores,
            queue.clone(),
            CacheConfig::from(&config.cache),
        ));

        Ok(Self {
            db,
            store,
            queue,
            local,
            primary,
        })
    }

    async fn close(self) -> anyhow::Result<()> {
        self.queue.flush().await?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("profile_sync=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Config file: {}", cli.config);
    let mut config = Config::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = PathBuf::from(data_dir);
    }
    info!("Data dir: {}", config.node.data_dir.display());

    let runtime = Runtime::open(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &runtime).await?,
        Command::Get { user_id } => {
            let record = runtime.store.get(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Update {
            user_id,
            display_name,
            username,
            bio,
            photo,
            clear_photo,
            links,
            email,
            phone,
            website,
            theme,
        } => {
            let mut patch = ProfilePatch {
                display_name,
                username,
                bio,
                ..Default::default()
            };
            if clear_photo {
                patch = patch.photo_ref(None);
            } else if photo.is_some() {
                patch = patch.photo_ref(photo);
            }
            if !links.is_empty() {
                patch = patch.social_links(parse_links(&links)?);
            }
            if email.is_some() || phone.is_some() || website.is_some() {
                patch = patch.contact_info(ContactInfo {
                    phone,
                    email,
                    website,
                });
            }
            if let Some(theme) = theme {
                patch = patch.theme(parse_theme(&theme)?);
            }
            if patch.is_empty() {
                bail!("nothing to update");
            }

            let ack = runtime.store.update(&user_id, patch).await?;
            if !ack.report.failed.is_empty() {
                warn!(failed = ?ack.report.failed, "Some stores missed the write; queued for retry");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "record": ack.record,
                    "succeeded": ack.report.succeeded,
                    "queued": ack.report.failed,
                }))?
            );
        }
        Command::Lookup { username } => {
            let record = runtime.store.find_by_username(&username).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Queue => {
            let entries = runtime.queue.entries()?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Drain => {
            let report = runtime.queue.drain().await?;
            let dropped: Vec<String> = report.dropped.iter().map(|e| e.to_string()).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "applied": report.applied,
                    "retried": report.retried,
                    "dropped": dropped,
                    "remaining": runtime.queue.len(),
                }))?
            );
        }
    }

    runtime.close().await
}

async fn serve(config: &Config, runtime: &Runtime) -> anyhow::Result<()> {
    let session = Arc::new(Session::new(runtime.store.clone()));
    let status = runtime.store.status().await;
    info!(stores = ?status.stores, queued = status.queued_writes, "Starting profile-sync");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (online_tx, online_rx) = watch::channel(true);

    let probe = runtime.primary.clone().map(|primary| {
        tokio::spawn(probe_connectivity(
            primary,
            config.sync.probe_interval(),
            online_tx,
            shutdown_rx.clone(),
        ))
    });

    let coordinator = SyncCoordinator::new(
        runtime.store.clone(),
        session,
        runtime.local.clone(),
        RetentionPolicy {
            max_age: config.local.retention(),
            max_records: config.local.max_records,
        },
        config.sync.drain_interval(),
    );
    let coordinator = tokio::spawn(coordinator.run(online_rx, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send(true)?;

    if let Err(e) = coordinator.await {
        error!(error = %e, "Sync coordinator task failed");
    }
    if let Some(probe) = probe {
        if let Err(e) = probe.await {
            error!(error = %e, "Connectivity probe task failed");
        }
    }
    Ok(())
}

fn parse_links(links: &[String]) -> anyhow::Result<BTreeMap<Platform, String>> {
    let mut parsed = BTreeMap::new();
    for link in links {
        let Some((platform, url)) = link.split_once('=') else {
            bail!("expected platform=url, got '{}'", link);
        };
        let platform: Platform =
            serde_json::from_value(serde_json::Value::String(platform.trim().to_lowercase()))
                .with_context(|| format!("unknown platform '{}'", platform))?;
        parsed.insert(platform, url.trim().to_string());
    }
    Ok(parsed)
}

fn parse_theme(theme: &str) -> anyhow::Result<Theme> {
    match theme.to_lowercase().as_str() {
        "light" => Ok(Theme::Light),
        "dark" => Ok(Theme::Dark),
        other => bail!("unknown theme '{}'", other),
    }
}
