//! glwho: dump glftpd's in-memory session table as JSON.
//!
//! Attaches read-only to the daemon's SysV shared memory segment, decodes
//! the online-session records, and prints them as a JSON array on stdout.
//! All diagnostics go to stderr so stdout stays machine-readable.

mod config;
mod online;
mod shm;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glwho")]
#[command(about = "Read glftpd's shared memory session table and output it as JSON")]
#[command(version)]
struct Cli {
    /// Output human-readable JSON
    #[arg(short = 'p', long)]
    pretty: bool,

    /// Use an alternate config file instead of /etc/glftpd.conf
    #[arg(short = 'r', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let resolved = config::resolve(cli.config.as_deref())?;
    tracing::debug!(
        "resolved {}: ipc_key=0x{:08x} record_cap={}",
        resolved.source_path.display(),
        resolved.segment_key,
        resolved.record_cap
    );

    let entries = match shm::locate(resolved.segment_key)? {
        Some(view) => online::decode_sessions(view.as_bytes(), resolved.record_cap),
        None => {
            tracing::warn!(
                "no shared memory segment for key 0x{:08x}",
                resolved.segment_key
            );
            Vec::new()
        }
    };

    let document = if cli.pretty {
        serde_json::to_string_pretty(&entries)?
    } else {
        serde_json::to_string(&entries)?
    };
    println!("{document}");

    Ok(())
}
