//! SSH remote execution through the `ssh` and `scp` command-line clients

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backends::remote::{AsyncCommand, ProcessCommand, ShellTransport};
use crate::command::{shell_escape, Command};
use crate::error::{Error, Result};
use crate::runner::ReadMode;

/// SSH connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    pub host: String,
    /// SSH user (optional, uses system default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// SSH port (optional, defaults to 22)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Path to identity file (private key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// Additional SSH arguments, passed to both `ssh` and `scp`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add extra SSH arguments
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Get the host string (user@host if user is specified)
    pub fn host_string(&self) -> String {
        if let Some(user) = &self.user {
            format!("{}@{}", user, self.host)
        } else {
            self.host.clone()
        }
    }

    /// Build the `ssh` invocation that runs `remote_command` on the host.
    ///
    /// Without `run_in_shell` the command is still handed to the remote login shell,
    /// which is how `ssh` always executes; the flag only controls whether it is wrapped in
    /// an explicit `sh -c`.
    pub fn ssh_command(&self, remote_command: &str, run_in_shell: bool) -> Command {
        let mut ssh_cmd = Command::new("ssh");
        // No TTY: the command's streams must stay byte-exact pipes.
        ssh_cmd.arg("-T");

        if let Some(port) = self.port {
            ssh_cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            ssh_cmd.arg("-i").arg(identity);
        }
        for arg in &self.extra_args {
            ssh_cmd.arg(arg);
        }

        ssh_cmd.arg(self.host_string());
        if run_in_shell {
            ssh_cmd.arg(format!("sh -c {}", shell_escape(remote_command)));
        } else {
            ssh_cmd.arg(remote_command);
        }
        ssh_cmd
    }

    /// Build the `scp` invocation that copies a local path to `destination` on the host
    pub fn scp_command(&self, source: &Path, destination: &str) -> Command {
        let mut scp_cmd = Command::new("scp");
        scp_cmd.arg("-r").arg("-q");

        if let Some(port) = self.port {
            scp_cmd.arg("-P").arg(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            scp_cmd.arg("-i").arg(identity);
        }
        for arg in &self.extra_args {
            scp_cmd.arg(arg);
        }

        scp_cmd
            .arg(source)
            .arg(format!("{}:{}", self.host_string(), destination));
        scp_cmd
    }
}

/// Shell transport that executes commands on a remote host over `ssh`
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    /// Create a transport for the given host
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// The connection configuration
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

impl ShellTransport for SshTransport {
    fn describe(&self) -> String {
        format!("SSH to {}", self.config.host_string())
    }

    fn begin_command(
        &self,
        command_text: &str,
        run_in_shell: bool,
        read_mode: ReadMode,
    ) -> Result<Box<dyn AsyncCommand>> {
        if command_text.trim().is_empty() {
            return Err(Error::invalid_argument("command_text", "command is empty"));
        }
        let ssh_cmd = self.config.ssh_command(command_text, run_in_shell);
        let command = ProcessCommand::spawn(ssh_cmd, read_mode)
            .map_err(|e| e.with_layer_context("SSH"))?;
        Ok(Box::new(command))
    }
}
