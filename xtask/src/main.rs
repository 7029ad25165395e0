use anyhow::Result;
use clap::{Parser, Subcommand};
use nfc_core::SessionConfig;
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Run the CLI, passing any extra arguments through
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run read, write and clear sessions against the simulated reader
    Demo,
    /// Write the default session configuration
    Config {
        #[arg(default_value = "nfctool.toml")]
        path: PathBuf,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let mut full = vec!["run", "-p", "nfc-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Run")?;
        }
        Commands::Demo => {
            let sessions: [&[&str]; 4] = [&["read"], &["write", "abcd"], &["clear"], &["legacy"]];
            for session in sessions {
                println!("== nfctool --simulate {}", session.join(" "));
                let mut full = vec!["run", "-q", "-p", "nfc-cli", "--", "--simulate"];
                full.extend_from_slice(session);
                cargo(&full, "Demo")?;
            }
        }
        Commands::Config { path } => {
            SessionConfig::default().save_to_file(path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
