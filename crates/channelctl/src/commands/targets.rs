use anyhow::Result;
use channel_config::TargetSpec;

use super::Context;

pub fn run(context: &Context) -> Result<i32> {
    let targets = &context.config().targets;
    if targets.is_empty() {
        println!("No targets configured (\"local\" is always available)");
    }
    for (name, spec) in targets {
        println!("{:<20} {}", name, summary(spec));
    }
    Ok(0)
}

fn summary(spec: &TargetSpec) -> String {
    match spec {
        TargetSpec::Local => "local".to_string(),
        TargetSpec::Ssh(ssh) => {
            let host = match &ssh.user {
                Some(user) => format!("{}@{}", user, ssh.host),
                None => ssh.host.clone(),
            };
            match ssh.port {
                Some(port) => format!("ssh {}:{}", host, port),
                None => format!("ssh {}", host),
            }
        }
        TargetSpec::Container { config, via } => match via {
            Some(via) => format!("container {} via {}", config.container, via),
            None => format!("container {}", config.container),
        },
    }
}
