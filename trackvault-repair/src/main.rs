//! `trackvault-repair`: repair one account's mangled ciphertext in place.
//!
//! The password is read from `TRACKVAULT_PASSWORD`, or from the first line
//! of stdin when the variable is unset.

use anyhow::{Context, bail};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trackvault_crypto::{DEFAULT_KDF_ITERATIONS, KdfParams};
use trackvault_repair::{RepairOptions, repair_user};
use trackvault_storage::DuckStore;
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "TRACKVAULT_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "trackvault-repair", version, about = "Repair mangled encrypted records")]
struct Cli {
    /// Path to the TrackVault DuckDB database.
    #[arg(long)]
    db: PathBuf,

    /// Account to repair.
    #[arg(long)]
    email: String,

    /// Report what would change without writing.
    #[arg(long)]
    dry_run: bool,

    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,

    /// PBKDF2 iterations the account's key was wrapped with.
    #[arg(long, default_value_t = DEFAULT_KDF_ITERATIONS)]
    kdf_iterations: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let password = read_password()?;

    let store = DuckStore::open(&cli.db)
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;
    let options = RepairOptions {
        dry_run: cli.dry_run,
        kdf: KdfParams::with_iterations(cli.kdf_iterations),
    };
    let report = repair_user(&store, &store, &cli.email, &password, &options)
        .with_context(|| format!("repair failed for {}", cli.email))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

fn read_password() -> anyhow::Result<Zeroizing<String>> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(password));
    }

    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        bail!("no password given; set {PASSWORD_ENV} or pipe it on stdin");
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}
