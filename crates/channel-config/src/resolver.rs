//! Named target resolution
//!
//! [`ConfigResolver`] turns target names from a [`Config`] into connections. Targets
//! reached through another target share that target's connection, so closing an outer
//! connection also closes every container behind it.

use command_channel::{Connection, Error as ChannelError, Result as ChannelResult, TargetResolver};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::{Config, ConfigError, Result, TargetSpec};

/// Resolves configured target names to connections, reusing them per name
pub struct ConfigResolver {
    config: Config,
    connections: Mutex<HashMap<String, Connection>>,
}

impl ConfigResolver {
    /// Create a resolver over a validated configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration targets are resolved from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Names of all configured targets
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.config.targets.keys().map(String::as_str)
    }

    /// Get or open the connection for `name`
    pub fn connect(&self, name: &str) -> Result<Connection> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.connect_locked(name, &mut connections, 0)
    }

    fn connect_locked(
        &self,
        name: &str,
        connections: &mut HashMap<String, Connection>,
        depth: usize,
    ) -> Result<Connection> {
        if let Some(connection) = connections.get(name) {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
        }
        if depth > self.config.targets.len() {
            return Err(ConfigError::ValidationError(format!(
                "Target '{}' is part of a via cycle",
                name
            )));
        }

        let spec = self
            .config
            .targets
            .get(name)
            .ok_or_else(|| ConfigError::TargetNotFound(name.to_string()))?;

        let connection = match spec {
            TargetSpec::Local => Connection::local(),
            TargetSpec::Ssh(ssh) => Connection::ssh(ssh.clone()),
            TargetSpec::Container { config, via } => {
                let outer = match via {
                    Some(via) => Some(self.connect_locked(via, connections, depth + 1)?),
                    None => None,
                };
                Connection::container(config.clone(), outer)
            }
        }
        .with_command_timeout(self.config.settings.command_timeout());

        debug!(target_name = name, connection = %connection.describe(), "opened connection");
        connections.insert(name.to_string(), connection.clone());
        Ok(connection)
    }

    /// Close every connection opened so far
    pub fn close_all(&self) {
        let connections: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, connection)| connection)
            .collect();
        for connection in connections {
            connection.close();
        }
    }
}

impl TargetResolver for ConfigResolver {
    fn resolve(&self, name: &str) -> ChannelResult<Option<Connection>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        self.connect(name)
            .map(Some)
            .map_err(|e| ChannelError::invalid_argument("target", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;
    use command_channel::Target;

    fn resolver() -> ConfigResolver {
        let yaml = r#"
version: "1.0"
settings:
  command_timeout_ms: 5000
targets:
  here:
    type: local
  box:
    type: ssh
    host: build.example
    user: dev
  app:
    type: container
    container: app
    via: box
  sidecar:
    type: container
    container: sidecar
    via: box
"#;
        ConfigResolver::new(parse_str(yaml).unwrap())
    }

    #[test]
    fn test_resolves_nested_targets() {
        let resolver = resolver();
        let app = resolver.resolve("app").unwrap().unwrap();
        assert!(matches!(app.target(), Target::Container(c) if c.container == "app"));
        assert_eq!(app.describe(), "Docker exec in app via SSH to dev@build.example");
    }

    #[test]
    fn test_containers_share_outer_connection() {
        let resolver = resolver();
        let app = resolver.connect("app").unwrap();
        let sidecar = resolver.connect("sidecar").unwrap();

        resolver.connect("box").unwrap().close();
        assert!(app.is_closed());
        assert!(sidecar.is_closed());

        // A closed connection is replaced on the next lookup.
        assert!(!resolver.connect("app").unwrap().is_closed());
    }

    #[test]
    fn test_blank_name_is_cancellation() {
        assert!(resolver().resolve("  ").unwrap().is_none());
    }

    #[test]
    fn test_unknown_name() {
        let resolver = resolver();
        assert!(matches!(resolver.connect("mars"), Err(ConfigError::TargetNotFound(_))));
        assert!(resolver.resolve("mars").is_err());
    }

    #[test]
    fn test_close_all() {
        let resolver = resolver();
        let here = resolver.connect("here").unwrap();
        resolver.close_all();
        assert!(here.is_closed());
    }
}
