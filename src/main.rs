use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use ghostable::cli::commands::{cache, device, token, version};
use ghostable::cli::{load_settings, open_store, CacheAction, Cli, Commands, DeviceAction, TokenAction};
use ghostable::errors::Result;

/// Log to stderr, filtered by `GHOSTABLE_LOG` (default: warn).
fn init_logging() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("GHOSTABLE_LOG")
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}

fn run(cli: &Cli) -> Result<()> {
    // Commands that never touch the key store.
    match &cli.command {
        Commands::Version => return version::execute(),
        Commands::Token {
            action: TokenAction::Keygen { json },
        } => return token::execute_keygen(*json),
        _ => {}
    }

    let settings = load_settings()?;
    let store = open_store(cli, &settings)?;
    let store = store.as_ref();

    match &cli.command {
        Commands::Device { action } => match action {
            DeviceAction::Link {
                name,
                device_id,
                derive_encryption_key,
            } => device::execute_link(
                store,
                &settings,
                name.as_deref(),
                device_id.as_deref(),
                *derive_encryption_key,
            ),
            DeviceAction::Show { json } => device::execute_show(store, *json),
            DeviceAction::Rename { device_id, name } => {
                device::execute_rename(store, device_id, name.as_deref())
            }
            DeviceAction::Unlink { force } => device::execute_unlink(store, *force),
        },
        Commands::Cache {
            action: CacheAction::Clear { project, env },
        } => cache::execute_clear(store, project, env),
        Commands::Version | Commands::Token { .. } => Ok(()),
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        ghostable::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}
