//! Docker container execution via the `docker` CLI

use serde::{Deserialize, Serialize};

use crate::command::Command;

/// A running container that commands are executed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container name or ID
    pub container: String,
    /// User to run as in container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Working directory in container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl ContainerConfig {
    /// Create a new container target
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            user: None,
            workdir: None,
        }
    }

    /// Set the user to run as
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Wrap `command_text` so that it runs inside the container.
    ///
    /// The result is itself command text for the outer target's shell. `-i` keeps the
    /// container command's stdin attached so interactive shells stay writable.
    pub fn exec_command(&self, command_text: &str) -> Command {
        let mut docker_cmd = Command::new("docker");
        docker_cmd.arg("exec").arg("-i");

        if let Some(user) = &self.user {
            docker_cmd.arg("-u").arg(user);
        }
        if let Some(workdir) = &self.workdir {
            docker_cmd.arg("-w").arg(workdir);
        }

        docker_cmd.arg(&self.container);
        docker_cmd.arg("sh").arg("-c").arg(command_text);
        docker_cmd
    }

    /// `docker cp <source> <container>:<destination>`, run on the outer target
    pub fn copy_command(&self, source: &str, destination: &str) -> Command {
        let mut docker_cmd = Command::new("docker");
        docker_cmd
            .arg("cp")
            .arg(source)
            .arg(format!("{}:{}", self.container, destination));
        docker_cmd
    }

    /// Human-readable description
    pub fn describe(&self) -> String {
        format!("Docker exec in {}", self.container)
    }
}

/// Text of a `docker exec` invocation, for handing to an outer shell
pub fn exec_command_text(config: &ContainerConfig, command_text: &str) -> String {
    config.exec_command(command_text).to_shell_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_command() {
        let config = ContainerConfig::new("my-container").with_user("root");
        let text = exec_command_text(&config, "ps aux");
        assert_eq!(text, "docker exec -i -u root my-container sh -c 'ps aux'");
    }

    #[test]
    fn test_exec_command_with_workdir() {
        let config = ContainerConfig::new("app").with_working_dir("/srv/app");
        let cmd = config.exec_command("ls");
        assert_eq!(cmd.to_shell_string(), "docker exec -i -w /srv/app app sh -c ls");
    }

    #[test]
    fn test_copy_command() {
        let config = ContainerConfig::new("app");
        let cmd = config.copy_command("/tmp/ChannelStaging_x", "/opt/bin/tool");
        assert_eq!(
            cmd.to_shell_string(),
            "docker cp /tmp/ChannelStaging_x app:/opt/bin/tool"
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(ContainerConfig::new("c1").describe(), "Docker exec in c1");
    }
}
