//! framehub server entry point.
//!
//! Loads the TOML configuration, initialises structured logging, binds the
//! reactor, and runs the event loop on the main thread until shutdown.
//!
//! ```text
//! main()
//!  └─ ServerConfig::load()   -- framehub.toml, or first CLI argument
//!  └─ Reactor::bind()        -- listener + poll + waker
//!  └─ Reactor::run()         -- the readiness loop; blocks until shutdown
//! ```

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use framehub_server::config::DEFAULT_CONFIG_PATH;
use framehub_server::{Reactor, ServerConfig};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = ServerConfig::load(&config_path)?;

    // Initialise structured logging.  Level comes from the config file and is
    // overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("framehub server starting");
    if config_path.exists() {
        info!(path = %config_path.display(), "loaded configuration");
    } else {
        info!(path = %config_path.display(), "no config file found; using defaults");
    }

    let mut reactor = Reactor::bind(config)?;
    info!(addr = %reactor.local_addr(), "listening");

    reactor.run()?;

    info!("framehub server stopped");
    Ok(())
}
