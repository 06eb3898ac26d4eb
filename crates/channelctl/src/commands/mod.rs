//! Subcommand implementations

use anyhow::{Context as _, Result, anyhow};
use channel_config::{Config, ConfigResolver, Settings, parser};
use command_channel::resolver::resolve_or_report;
use command_channel::{Connection, LogErrorReporter};
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub mod copy;
pub mod exec;
pub mod launch;
pub mod mkdir;
pub mod ps;
pub mod shell;
pub mod targets;

/// Name that always refers to the local machine, configured or not
const LOCAL_TARGET: &str = "local";

/// Loaded configuration and the connections opened from it
pub struct Context {
    resolver: ConfigResolver,
}

impl Context {
    /// Load `path`, or start from an empty configuration if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            parser::parse_file(path).with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Config {
                version: "1.0".to_string(),
                settings: Settings::default(),
                targets: Default::default(),
            }
        };
        Ok(Self {
            resolver: ConfigResolver::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        self.resolver.config()
    }

    pub fn settings(&self) -> &Settings {
        &self.config().settings
    }

    /// Connection for a target name
    pub fn connect(&self, name: &str) -> Result<Connection> {
        if name == LOCAL_TARGET && !self.resolver.config().targets.contains_key(name) {
            return Ok(Connection::local().with_command_timeout(self.settings().command_timeout()));
        }
        resolve_or_report(&self.resolver, &LogErrorReporter, name)
            .ok_or_else(|| anyhow!("No connection to target '{}'", name))
    }

    /// Close every connection opened so far
    pub fn close(&self) {
        self.resolver.close_all();
    }
}

/// Install the fmt subscriber; RUST_LOG wins, then `--log`, then the configured level
pub fn init_logging(cli_level: Option<&str>, context: &Context) {
    let fallback = cli_level.unwrap_or_else(|| context.settings().log_level()).to_string();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
