//! Line-oriented command interpreter over a [`DB`].

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use config::ColumnFamilyDescriptor;
use engine::{ColumnFamilyHandle, CompactRangeOptions, FlushOptions, ReadOptions, WriteOptions, DB};
use tracing::debug;

use crate::settings::Settings;

pub const HELP: &str = "\
Commands: SET key value | GET key | DEL key | DELRANGE begin end | MERGE key value
          SCAN [start] [end] | FLUSH | COMPACT [begin end] | STATS | PROP name
          CF LIST | CF CREATE name | CF DROP name | USE name | HELP | EXIT";

/// What the read loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    db: DB,
    settings: Settings,
    write_options: WriteOptions,
    handles: BTreeMap<String, ColumnFamilyHandle>,
    current: String,
}

impl Shell {
    /// Opens (or creates) the database with every column family it has.
    pub fn open(settings: Settings) -> Result<Self> {
        let options = settings.options();
        let path = &settings.db_path;
        let names = if path.join("CURRENT").exists() {
            DB::list_column_families(path)?
        } else {
            vec![config::DEFAULT_COLUMN_FAMILY_NAME.to_string()]
        };
        let descriptors = names
            .iter()
            .map(|n| ColumnFamilyDescriptor::new(n.as_str(), options.map_cf_options()))
            .collect();
        let (db, handles) = DB::open_cf(options.map_db_options(), path, descriptors)?;
        let handles = handles
            .into_iter()
            .map(|h| (h.name().to_string(), h))
            .collect();
        Ok(Self {
            db,
            write_options: WriteOptions::new().sync(settings.wal_sync),
            settings,
            handles,
            current: config::DEFAULT_COLUMN_FAMILY_NAME.to_string(),
        })
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    pub fn prompt(&self) -> String {
        if self.current == config::DEFAULT_COLUMN_FAMILY_NAME {
            "> ".to_string()
        } else {
            format!("{}> ", self.current)
        }
    }

    fn cf(&self) -> &ColumnFamilyHandle {
        self.handles
            .get(&self.current)
            .unwrap_or_else(|| self.db.default_column_family())
    }

    fn level_counts(&self) -> String {
        let files = |level: usize| {
            self.db
                .get_int_property_cf(self.cf(), &format!("rocksdb.num-files-at-level{level}"))
                .unwrap_or(0)
        };
        format!("L0={}, L1={}", files(0), files(1))
    }

    /// Runs one input line. Command failures are reported on `out` as
    /// `ERR ...`; only failing to write `out` is an error.
    pub fn execute(&mut self, line: &str, out: &mut impl Write) -> Result<Flow> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<&str> = parts.collect();
        debug!(cmd, args = args.len(), "shell command");

        match cmd.to_uppercase().as_str() {
            "SET" => match args.as_slice() {
                [key, value @ ..] if !value.is_empty() => {
                    let value = value.join(" ");
                    let res = self.db.put_cf(&self.write_options, self.cf(), key, value);
                    report(out, res.map(|()| "OK".to_string()), "set")?;
                }
                _ => writeln!(out, "ERR usage: SET key value")?,
            },
            "GET" => match args.as_slice() {
                [key] => match self.db.get_cf(&ReadOptions::default(), self.cf(), key) {
                    Ok(Some(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                    Ok(None) => writeln!(out, "(nil)")?,
                    Err(e) => writeln!(out, "ERR read failed: {e}")?,
                },
                _ => writeln!(out, "ERR usage: GET key")?,
            },
            "DEL" => match args.as_slice() {
                [key] => {
                    let res = self.db.delete_cf(&self.write_options, self.cf(), key);
                    report(out, res.map(|()| "OK".to_string()), "del")?;
                }
                _ => writeln!(out, "ERR usage: DEL key")?,
            },
            "DELRANGE" => match args.as_slice() {
                [begin, end] => {
                    let res = self
                        .db
                        .delete_range_cf(&self.write_options, self.cf(), begin, end);
                    report(out, res.map(|()| "OK".to_string()), "delrange")?;
                }
                _ => writeln!(out, "ERR usage: DELRANGE begin end")?,
            },
            "MERGE" => match args.as_slice() {
                [key, value @ ..] if !value.is_empty() => {
                    let value = value.join(" ");
                    let res = self.db.merge_cf(&self.write_options, self.cf(), key, value);
                    report(out, res.map(|()| "OK".to_string()), "merge")?;
                }
                _ => writeln!(out, "ERR usage: MERGE key value")?,
            },
            "SCAN" => self.scan(args.first().copied(), args.get(1).copied(), out)?,
            "FLUSH" => {
                let res = self.db.flush_cf(&FlushOptions::default(), self.cf());
                let res = res.map(|()| format!("OK ({})", self.level_counts()));
                report(out, res, "flush")?;
            }
            "COMPACT" => {
                let (begin, end) = match args.as_slice() {
                    [] => (None, None),
                    [b, e] => (Some(b.as_bytes()), Some(e.as_bytes())),
                    _ => {
                        writeln!(out, "ERR usage: COMPACT [begin end]")?;
                        return Ok(Flow::Continue);
                    }
                };
                let res = self
                    .db
                    .compact_range_cf(&CompactRangeOptions::default(), self.cf(), begin, end);
                let res = res.map(|()| format!("OK ({})", self.level_counts()));
                report(out, res, "compact")?;
            }
            "STATS" => match self.db.get_property_cf(self.cf(), "rocksdb.stats") {
                Some(stats) => write!(out, "{stats}")?,
                None => writeln!(out, "ERR no stats")?,
            },
            "PROP" => match args.as_slice() {
                [name] => match self.db.get_property_cf(self.cf(), name) {
                    Some(v) => writeln!(out, "{v}")?,
                    None => writeln!(out, "ERR unknown property: {name}")?,
                },
                _ => writeln!(out, "ERR usage: PROP name")?,
            },
            "CF" => self.column_family(&args, out)?,
            "USE" => match args.as_slice() {
                [name] if self.handles.contains_key(*name) => {
                    self.current = (*name).to_string();
                    writeln!(out, "OK")?;
                }
                [name] => writeln!(out, "ERR no such column family: {name}")?,
                _ => writeln!(out, "ERR usage: USE name")?,
            },
            "HELP" => writeln!(out, "{HELP}")?,
            "EXIT" | "QUIT" => {
                writeln!(out, "bye")?;
                return Ok(Flow::Exit);
            }
            _ => writeln!(out, "unknown command: {cmd}")?,
        }
        Ok(Flow::Continue)
    }

    fn scan(&self, start: Option<&str>, end: Option<&str>, out: &mut impl Write) -> Result<()> {
        let mut options = ReadOptions::default();
        if let Some(start) = start {
            options = options.iterate_lower_bound(start.as_bytes());
        }
        if let Some(end) = end {
            options = options.iterate_upper_bound(end.as_bytes());
        }
        let iter = match self.db.new_iterator(&options, self.cf()) {
            Ok(iter) => iter,
            Err(e) => {
                writeln!(out, "ERR scan failed: {e}")?;
                return Ok(());
            }
        };
        let mut count = 0usize;
        for entry in iter.entries() {
            match entry {
                Ok((k, v)) => {
                    writeln!(
                        out,
                        "{} -> {}",
                        String::from_utf8_lossy(&k),
                        String::from_utf8_lossy(&v)
                    )?;
                    count += 1;
                }
                Err(e) => {
                    writeln!(out, "ERR scan failed: {e}")?;
                    return Ok(());
                }
            }
        }
        if count == 0 {
            writeln!(out, "(empty)")?;
        } else {
            writeln!(out, "({count} entries)")?;
        }
        Ok(())
    }

    fn column_family(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        match args {
            [sub] if sub.eq_ignore_ascii_case("LIST") => {
                for name in self.handles.keys() {
                    let marker = if *name == self.current { "*" } else { " " };
                    writeln!(out, "{marker} {name}")?;
                }
            }
            [sub, name] if sub.eq_ignore_ascii_case("CREATE") => {
                match self
                    .db
                    .create_column_family(self.settings.options().map_cf_options(), name)
                {
                    Ok(handle) => {
                        self.handles.insert((*name).to_string(), handle);
                        writeln!(out, "OK")?;
                    }
                    Err(e) => writeln!(out, "ERR create failed: {e}")?,
                }
            }
            [sub, name] if sub.eq_ignore_ascii_case("DROP") => {
                let Some(handle) = self.handles.get(*name).cloned() else {
                    writeln!(out, "ERR no such column family: {name}")?;
                    return Ok(());
                };
                match self.db.drop_column_family(&handle) {
                    Ok(()) => {
                        self.handles.remove(*name);
                        self.db.destroy_column_family_handle(handle);
                        if self.current == *name {
                            self.current = config::DEFAULT_COLUMN_FAMILY_NAME.to_string();
                        }
                        writeln!(out, "OK")?;
                    }
                    Err(e) => writeln!(out, "ERR drop failed: {e}")?,
                }
            }
            _ => writeln!(out, "ERR usage: CF LIST | CF CREATE name | CF DROP name")?,
        }
        Ok(())
    }
}

fn report(out: &mut impl Write, res: types::Result<String>, what: &str) -> Result<()> {
    match res {
        Ok(msg) => writeln!(out, "{msg}")?,
        Err(e) => writeln!(out, "ERR {what} failed: {e}")?,
    }
    Ok(())
}
