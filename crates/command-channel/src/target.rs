//! Execution target types
//!
//! A target says where commands run. Resolving a human-readable name to a target is the
//! caller's business (see [`TargetResolver`](crate::resolver::TargetResolver)).

use serde::{Deserialize, Serialize};

use crate::backends::{ContainerConfig, SshConfig};

/// Where a [`Connection`](crate::connection::Connection) executes commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// The local machine
    Local,
    /// A remote host reached over SSH
    Ssh(SshConfig),
    /// A container, reached through the connection's outer target
    Container(ContainerConfig),
}

impl Target {
    /// Human-readable description of the target
    pub fn describe(&self) -> String {
        match self {
            Target::Local => "local machine".to_string(),
            Target::Ssh(config) => format!("SSH to {}", config.host_string()),
            Target::Container(config) => config.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(Target::Local.describe(), "local machine");
        assert_eq!(
            Target::Ssh(SshConfig::new("host").with_user("u")).describe(),
            "SSH to u@host"
        );
        assert_eq!(
            Target::Container(ContainerConfig::new("db")).describe(),
            "Docker exec in db"
        );
    }
}
