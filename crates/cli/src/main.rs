mod output;
mod project_commands;
#[cfg(feature = "file-watcher")]
mod watch_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    rootline_config::RootlineConfig,
    rootline_projects::{FsScanner, IdentityDeriver, ProjectService, SqliteProjectRegistry},
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "rootline",
    version,
    about = "Track project directories by identity, across renames and moves"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/rootline/).
    #[arg(long, global = true, env = "ROOTLINE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Registry database file (overrides `[database] path`).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List project candidates under ROOT without changing the registry.
    Scan { root: Option<PathBuf> },
    /// Scan ROOT and reconcile the registry with what was found.
    Sync { root: Option<PathBuf> },
    /// Track every project under ROOT without archiving anything.
    Import { root: Option<PathBuf> },
    /// List tracked projects.
    List {
        /// Show archived projects instead of active ones.
        #[arg(long)]
        archived: bool,
    },
    /// Bring an archived project back.
    Restore { id: String },
    /// Permanently delete an archived project.
    Purge { id: String },
    /// Permanently delete every archived project.
    PurgeArchived,
    /// Delete every project and everything that references them.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
    /// Keep the registry in sync while project directories are removed or
    /// renamed.
    #[cfg(feature = "file-watcher")]
    Watch { root: Option<PathBuf> },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Open the registry and wire the service from `config`.
async fn open_service(
    config: &RootlineConfig,
    db: Option<PathBuf>,
) -> anyhow::Result<ProjectService> {
    let db_path = db.unwrap_or_else(|| rootline_config::database_path(config));
    let registry = SqliteProjectRegistry::open(&db_path)
        .await
        .with_context(|| format!("failed to open registry at {}", db_path.display()))?;
    debug!(db = %db_path.display(), "registry ready");

    let scanner = FsScanner::new(
        config.scan.max_depth,
        config.scan.concurrency,
        IdentityDeriver::new(config.identity.stamp_files),
    );
    let mut service = ProjectService::new(Arc::new(scanner), Arc::new(registry));
    if let Some(root) = &config.scan.root {
        service = service.with_default_root(root);
    }
    Ok(service)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "rootline starting");

    if let Some(ref dir) = cli.config_dir {
        rootline_config::set_config_dir(dir.clone());
    }
    let config = rootline_config::discover_and_load();
    let service = open_service(&config, cli.db).await?;
    let out = output::Output::new(cli.json);

    match cli.command {
        Commands::Scan { root } => project_commands::scan(&service, root, &out).await,
        Commands::Sync { root } => project_commands::sync(&service, root, &out).await,
        Commands::Import { root } => project_commands::import(&service, root, &out).await,
        Commands::List { archived } => project_commands::list(&service, archived, &out).await,
        Commands::Restore { id } => project_commands::restore(&service, &id, &out).await,
        Commands::Purge { id } => project_commands::purge(&service, &id, &out).await,
        Commands::PurgeArchived => project_commands::purge_archived(&service, &out).await,
        Commands::Reset { yes } => project_commands::reset(&service, yes, &out).await,
        #[cfg(feature = "file-watcher")]
        Commands::Watch { root } => {
            watch_commands::watch(&service, root, &config.watcher, &out).await
        },
    }
}
