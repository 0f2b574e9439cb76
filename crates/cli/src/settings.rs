//! Shell configuration read from `RIPTIDE_*` environment variables.

use anyhow::{bail, Context, Result};
use config::{CompactionStyle, Options};
use std::path::PathBuf;
use std::sync::Arc;
use types::{Associative, StringAppendOperator};

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub write_buffer_kb: usize,
    pub wal_sync: bool,
    /// 0 turns automatic compaction off.
    pub l0_trigger: usize,
    pub compaction_style: CompactionStyle,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/db"),
            write_buffer_kb: 64 * 1024,
            wal_sync: false,
            l0_trigger: 4,
            compaction_style: CompactionStyle::Level,
        }
    }
}

impl Settings {
    /// ```text
    /// RIPTIDE_DB_PATH           database directory        (default: "data/db")
    /// RIPTIDE_WRITE_BUFFER_KB   memtable size in KiB      (default: 65536)
    /// RIPTIDE_WAL_SYNC          fsync every write         (default: "false")
    /// RIPTIDE_L0_TRIGGER        L0 compaction trigger     (default: 4, 0 = disabled)
    /// RIPTIDE_COMPACTION_STYLE  level | universal | fifo  (default: "level")
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("RIPTIDE_DB_PATH").map_or(defaults.db_path, PathBuf::from);
        let write_buffer_kb = match get("RIPTIDE_WRITE_BUFFER_KB") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("RIPTIDE_WRITE_BUFFER_KB={v}"))?,
            None => defaults.write_buffer_kb,
        };
        if write_buffer_kb == 0 {
            bail!("RIPTIDE_WRITE_BUFFER_KB must be positive");
        }
        let wal_sync = match get("RIPTIDE_WAL_SYNC") {
            Some(v) => parse_bool(&v).with_context(|| format!("RIPTIDE_WAL_SYNC={v}"))?,
            None => defaults.wal_sync,
        };
        let l0_trigger = match get("RIPTIDE_L0_TRIGGER") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("RIPTIDE_L0_TRIGGER={v}"))?,
            None => defaults.l0_trigger,
        };
        let compaction_style = match get("RIPTIDE_COMPACTION_STYLE") {
            Some(v) => CompactionStyle::parse(&v.trim().to_lowercase())
                .with_context(|| format!("RIPTIDE_COMPACTION_STYLE={v}: expected level, universal or fifo"))?,
            None => defaults.compaction_style,
        };
        Ok(Self {
            db_path,
            write_buffer_kb,
            wal_sync,
            l0_trigger,
            compaction_style,
        })
    }

    /// Engine options for every column family the shell opens.
    pub fn options(&self) -> Options {
        let mut opts = Options::new()
            .create_if_missing(true)
            .write_buffer_size(self.write_buffer_kb * 1024)
            .compaction_style(self.compaction_style)
            .merge_operator(Arc::new(Associative(StringAppendOperator::new(b','))));
        opts.cf = if self.l0_trigger == 0 {
            opts.cf.disable_auto_compactions(true)
        } else {
            opts.cf.level0_file_num_compaction_trigger(self.l0_trigger)
        };
        opts
    }

    pub fn banner(&self) -> String {
        format!(
            "db={}, write_buffer={}KiB, wal_sync={}, l0_trigger={}, style={}",
            self.db_path.display(),
            self.write_buffer_kb,
            self.wal_sync,
            self.l0_trigger,
            style_name(self.compaction_style),
        )
    }
}

fn style_name(style: CompactionStyle) -> &'static str {
    match style {
        CompactionStyle::Level => "level",
        CompactionStyle::Universal => "universal",
        CompactionStyle::Fifo => "fifo",
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other}"),
    }
}
