use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "channelctl")]
#[command(about = "Run commands and debuggers on local, remote and container targets")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "channels.yaml")]
    config: PathBuf,

    /// Log filter, overriding the configured level (RUST_LOG also works)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured targets
    Targets,

    /// Run a command to completion and print its output
    Exec {
        /// Target name
        target: String,
        /// Command text, run in a shell
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
        /// Timeout in milliseconds
        #[arg(short, long, default_value_t = 30_000)]
        timeout_ms: u64,
    },

    /// Create a directory and print its absolute path
    Mkdir {
        /// Target name
        target: String,
        /// Directory to create
        path: String,
    },

    /// Copy a local file or directory to a target
    Copy {
        /// Target name
        target: String,
        /// Local source path
        source: PathBuf,
        /// Destination path on the target
        destination: String,
        /// Timeout in seconds (none by default)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List processes on a target
    Ps {
        /// Target name
        target: String,
    },

    /// Run an interactive command, forwarding this terminal's input
    Shell {
        /// Target name
        target: String,
        /// Command text
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Launch a debugger and bridge its streams to this process
    Launch {
        /// Run through a target's connection instead of a terminal and FIFOs
        #[arg(long)]
        target: Option<String>,
        /// Debugger command line
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = commands::Context::load(&cli.config)?;
    commands::init_logging(cli.log.as_deref(), &context);

    let code = match cli.command {
        Commands::Targets => commands::targets::run(&context),
        Commands::Exec {
            target,
            command,
            timeout_ms,
        } => commands::exec::run(&context, &target, &command.join(" "), timeout_ms),
        Commands::Mkdir { target, path } => commands::mkdir::run(&context, &target, &path),
        Commands::Copy {
            target,
            source,
            destination,
            timeout,
        } => commands::copy::run(&context, &target, &source, &destination, timeout),
        Commands::Ps { target } => commands::ps::run(&context, &target),
        Commands::Shell { target, command } => commands::shell::run(&context, &target, &command.join(" ")),
        Commands::Launch { target, command } => {
            commands::launch::run(&context, target.as_deref(), &command.join(" "))
        }
    };

    context.close();
    match code {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => Err(e),
    }
}
