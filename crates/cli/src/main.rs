//! Bridge operator CLI.
//!
//! Commands:
//! - `ceremony`: run a trusted-dealer key ceremony and print the group key
//! - `demo`: drive one simulated order end to end with mock collaborators
//! - `verify-audit`: recompute an audit chain exported as JSON

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bridge_audit::{AuditChain, AuditEntry, Verification};
use bridge_signing::TrustedDealer;
use bridge_types::Chain;

mod demo;

/// Cross-chain bridge coordination core
#[derive(Parser)]
#[command(name = "bridge-core")]
#[command(author, version, about = "Bridge coordination core operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a trusted-dealer key ceremony and print the group public key
    Ceremony {
        /// Signature shares required (t of n)
        #[arg(long, default_value_t = 2)]
        threshold: u16,

        /// Total signers (n)
        #[arg(long, default_value_t = 3)]
        total_signers: u16,

        /// Destination chain the key signs for
        #[arg(long, default_value = "TON")]
        chain: String,
    },

    /// Drive one simulated order end to end with mock collaborators
    Demo {
        /// Source chain
        #[arg(long, default_value = "XMR")]
        source: String,

        /// Destination chain
        #[arg(long, default_value = "TON")]
        dest: String,

        /// Amount on the source chain
        #[arg(long, default_value = "1")]
        amount: String,
    },

    /// Verify an audit chain exported as a JSON array of entries
    VerifyAudit {
        /// Path to the exported JSON file
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ceremony {
            threshold,
            total_signers,
            chain,
        } => run_ceremony(threshold, total_signers, &chain),
        Commands::Demo {
            source,
            dest,
            amount,
        } => demo::run(&source, &dest, &amount).await,
        Commands::VerifyAudit { file } => verify_audit(&file),
    }
}

fn run_ceremony(threshold: u16, total_signers: u16, chain: &str) -> Result<()> {
    let chain: Chain = chain.parse()?;
    let output = TrustedDealer::run(threshold, total_signers)?;
    let record = TrustedDealer::record(chain, threshold, total_signers, &output);

    println!("key ceremony complete ({threshold} of {total_signers}, chain {chain})");
    println!("  ceremony id:      {}", record.id);
    println!("  group public key: {}", output.group_public_key_hex);
    println!("  signer indices:   {:?}", output.key_packages.keys().collect::<Vec<_>>());
    Ok(())
}

fn verify_audit(file: &PathBuf) -> Result<()> {
    let data = std::fs::read_to_string(file)?;
    let entries: Vec<AuditEntry> = serde_json::from_str(&data)?;

    match AuditChain::verify_entries(&entries) {
        Verification::Valid => {
            println!("audit chain valid ({} entries)", entries.len());
            Ok(())
        }
        Verification::FirstInvalid(seq) => {
            bail!("audit chain integrity violated at sequence {seq}")
        }
    }
}
