//! # CLI - RiptideKV Interactive Shell
//!
//! A REPL-style command-line interface over [`engine::DB`]. Reads commands
//! from stdin, executes them against the database, and prints results to
//! stdout. Works interactively or scripted (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value        Insert or update a key-value pair
//! GET key              Look up a key (prints value or "(nil)")
//! DEL key              Delete a key (writes a tombstone)
//! DELRANGE begin end   Delete every key in [begin, end)
//! MERGE key value      Append to a value (comma-separated)
//! SCAN [start] [end]   Range scan (inclusive start, exclusive end)
//! FLUSH                Flush the current column family's memtable
//! COMPACT [begin end]  Manual compaction of a key range (default: all)
//! STATS                Print rocksdb.stats for the current column family
//! PROP name            Print any rocksdb.* property
//! CF LIST|CREATE|DROP  Manage column families
//! USE name             Switch the current column family
//! EXIT / QUIT          Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings come from environment variables, see [`settings::Settings`].
//! Log output goes to stderr and is filtered by `RUST_LOG` (default `warn`).
//!
//! ## Example
//!
//! ```text
//! $ RIPTIDE_DB_PATH=/tmp/riptide cargo run -p cli
//! RiptideKV started (seq=0, db=/tmp/riptide, write_buffer=65536KiB, ...)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > SCAN
//! name -> Alice
//! (1 entries)
//! > EXIT
//! bye
//! ```

mod settings;
mod shell;

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

use settings::Settings;
use shell::{Flow, Shell, HELP};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let mut shell = Shell::open(settings.clone())
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    info!(path = %settings.db_path.display(), "shell started");

    println!(
        "RiptideKV started (seq={}, {})",
        shell.db().latest_sequence_number(),
        settings.banner()
    );
    println!("{HELP}");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "{}", shell.prompt())?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if shell.execute(&line, &mut out)? == Flow::Exit {
            break;
        }
        write!(out, "{}", shell.prompt())?;
        out.flush()?;
    }
    out.flush()?;
    drop(out);

    shell.db().close().context("closing database")?;
    Ok(())
}
