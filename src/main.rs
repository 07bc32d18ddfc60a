use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Context, Result};
use libc::STDIN_FILENO;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::trace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use userfs::{
    script::{Command as ScriptCommand, Session},
    DeletePolicy, Store, StoreConfig,
};

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Remove the name now, free storage on last close
    Unlink,
    /// Free storage now, invalidating open descriptors
    Immediate,
}

impl From<Policy> for DeletePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Unlink => DeletePolicy::Unlink,
            Policy::Immediate => DeletePolicy::Immediate,
        }
    }
}

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value_t = StoreConfig::BLOCK_SIZE)]
    block_size: usize,
    /// Enforce a per-file size limit in bytes
    #[arg(long)]
    max_file_size: Option<usize>,
    #[arg(long)]
    max_descriptors: Option<usize>,
    #[arg(long, value_enum, default_value = "unlink")]
    delete_policy: Policy,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file, or read commands from stdin
    Run {
        #[arg(index = 1)]
        script: Option<PathBuf>,
    },
    /// Run each argument as one command
    Exec {
        #[arg(index = 1, required = true)]
        commands: Vec<String>,
    },
}

fn interactive(session: &mut Session) -> Result<()> {
    let isatty = unsafe { libc::isatty(STDIN_FILENO) == 1 };
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut line = String::new();
    loop {
        if isatty {
            print!("userfs> ");
            stdout.flush()?;
        }
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match ScriptCommand::parse(&line) {
            Ok(Some(command)) => println!("{}", session.execute(&command)),
            Ok(None) => {}
            Err(err) if isatty => println!("{err:#}"),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
    trace!("Starting up userfs cli");
    let config = StoreConfig {
        block_size: cli.block_size,
        max_file_size: cli.max_file_size,
        max_descriptors: cli.max_descriptors,
        delete_policy: cli.delete_policy.into(),
    };
    let store = Store::with_config(config).wrap_err("Invalid store configuration")?;
    let mut session = Session::new(store);
    match cli.command {
        Command::Run { script: Some(path) } => {
            let script = std::fs::read_to_string(&path)
                .wrap_err_with(|| format!("Couldn't read script {path:?}"))?;
            for line in session.run_script(&script)? {
                println!("{line}");
            }
        }
        Command::Run { script: None } => interactive(&mut session)?,
        Command::Exec { commands } => {
            for (number, text) in commands.iter().enumerate() {
                let command = ScriptCommand::parse(text)
                    .wrap_err_with(|| format!("command {}", number + 1))?;
                if let Some(command) = command {
                    println!("{}", session.execute(&command));
                }
            }
        }
    }
    Ok(())
}
