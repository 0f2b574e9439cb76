//! The set of column families with their current versions, and the
//! MANIFEST that makes every change to it durable.
//!
//! The MANIFEST is a log of [`VersionEdit`]s framed exactly like a WAL. A
//! new MANIFEST starts with a snapshot of the whole state, then `CURRENT`
//! is switched to it. Replaying the named MANIFEST from the start rebuilds
//! the state at the last completed edit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};
use types::{Result, SequenceNumber, Status};
use wal::{WalReader, WalRecoveryMode, WalWriter};

use crate::column_family::CfState;
use crate::filename::{manifest_file_path, read_current_file, set_current_file};
use crate::table_cache::TableCache;
use crate::version::Version;
use crate::version_edit::{FileMetaData, VersionEdit};

pub(crate) const DEFAULT_CF_ID: u32 = 0;

#[derive(Debug, Default)]
pub(crate) struct RecoveredColumnFamily {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) comparator: Option<String>,
    pub(crate) log_number: u64,
    pub(crate) files: BTreeMap<u64, (usize, FileMetaData)>,
}

impl RecoveredColumnFamily {
    /// An edit listing every recovered file.
    pub(crate) fn files_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::for_column_family(self.id);
        for (level, f) in self.files.values() {
            edit.add_file(*level, f.clone());
        }
        edit
    }

    pub(crate) fn max_level(&self) -> usize {
        self.files.values().map(|(l, _)| *l).max().unwrap_or(0)
    }
}

/// State rebuilt by replaying a MANIFEST.
#[derive(Debug)]
pub(crate) struct ManifestContents {
    pub(crate) manifest_number: u64,
    pub(crate) cfs: BTreeMap<u32, RecoveredColumnFamily>,
    pub(crate) next_file_number: u64,
    pub(crate) last_sequence: SequenceNumber,
    pub(crate) prev_log_number: u64,
    pub(crate) max_column_family: u32,
}

impl ManifestContents {
    /// Replays the MANIFEST named by `dir/CURRENT`.
    pub(crate) fn recover(dir: &Path) -> Result<Self> {
        let name = read_current_file(dir)?;
        let manifest_number: u64 = name
            .strip_prefix("MANIFEST-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Status::corruption(format!("bad manifest name {name}")))?;
        let path = dir.join(&name);

        let mut cfs = BTreeMap::new();
        cfs.insert(
            DEFAULT_CF_ID,
            RecoveredColumnFamily {
                id: DEFAULT_CF_ID,
                name: config::DEFAULT_COLUMN_FAMILY_NAME.to_string(),
                ..Default::default()
            },
        );
        let mut dropped = BTreeSet::new();
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut prev_log_number = 0;
        let mut max_column_family = 0;

        let mut reader = WalReader::open(&path, WalRecoveryMode::TolerateCorruptedTailRecords)?;
        let mut edits = 0u64;
        reader.replay(|record| {
            let edit = VersionEdit::decode(record)?;
            edits += 1;
            if let Some(n) = edit.next_file_number {
                next_file_number = Some(n);
            }
            if let Some(s) = edit.last_sequence {
                last_sequence = Some(s);
            }
            if let Some(n) = edit.prev_log_number {
                prev_log_number = n;
            }
            if let Some(m) = edit.max_column_family {
                max_column_family = max_column_family.max(m);
            }

            let id = edit.column_family;
            if let Some(cf_name) = &edit.column_family_add {
                if cfs.contains_key(&id) {
                    return Err(Status::corruption(format!(
                        "column family {id} added twice"
                    )));
                }
                dropped.remove(&id);
                cfs.insert(
                    id,
                    RecoveredColumnFamily {
                        id,
                        name: cf_name.clone(),
                        ..Default::default()
                    },
                );
                max_column_family = max_column_family.max(id);
            } else if edit.is_column_family_drop {
                cfs.remove(&id);
                dropped.insert(id);
                return Ok(());
            }

            let Some(cf) = cfs.get_mut(&id) else {
                if dropped.contains(&id) {
                    return Ok(());
                }
                return Err(Status::corruption(format!(
                    "edit for unknown column family {id}"
                )));
            };
            if let Some(c) = &edit.comparator {
                cf.comparator = Some(c.clone());
            }
            if let Some(n) = edit.log_number {
                cf.log_number = cf.log_number.max(n);
            }
            for (level, number) in &edit.deleted_files {
                if cf.files.get(number).is_some_and(|(l, _)| l == level) {
                    cf.files.remove(number);
                }
            }
            for (level, f) in &edit.new_files {
                cf.files.insert(f.number, (*level, f.clone()));
            }
            Ok(())
        })?;

        let next_file_number = next_file_number
            .ok_or_else(|| Status::corruption("no next-file-number entry in manifest"))?;
        let last_sequence =
            last_sequence.ok_or_else(|| Status::corruption("no last-sequence entry in manifest"))?;
        debug!(manifest = %path.display(), edits, "manifest replayed");
        Ok(Self {
            manifest_number,
            cfs,
            next_file_number: next_file_number.max(manifest_number + 1),
            last_sequence,
            prev_log_number,
            max_column_family,
        })
    }
}

pub(crate) struct VersionSet {
    dir: PathBuf,
    pub(crate) table_cache: Arc<TableCache>,
    manifest: Option<WalWriter>,
    pub(crate) manifest_file_number: u64,
    pub(crate) next_file_number: u64,
    /// Last sequence number written to the MANIFEST.
    pub(crate) last_sequence: SequenceNumber,
    pub(crate) prev_log_number: u64,
    pub(crate) max_column_family: u32,
    pub(crate) cfs: BTreeMap<u32, CfState>,
    pub(crate) super_version_number: u64,
    /// Replaced versions; readers may still hold them.
    old_versions: Vec<Weak<Version>>,
}

impl VersionSet {
    pub(crate) fn new(dir: &Path, table_cache: Arc<TableCache>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            table_cache,
            manifest: None,
            manifest_file_number: 0,
            next_file_number: 2,
            last_sequence: 0,
            prev_log_number: 0,
            max_column_family: 0,
            cfs: BTreeMap::new(),
            super_version_number: 0,
            old_versions: Vec::new(),
        }
    }

    pub(crate) fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    pub(crate) fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub(crate) fn cf(&self, id: u32) -> Option<&CfState> {
        self.cfs.get(&id)
    }

    pub(crate) fn cf_mut(&mut self, id: u32) -> Option<&mut CfState> {
        self.cfs.get_mut(&id)
    }

    pub(crate) fn cf_by_name(&self, name: &str) -> Option<&CfState> {
        self.cfs.values().find(|c| c.name() == name)
    }

    pub(crate) fn cf_state(&self, id: u32) -> Result<&CfState> {
        self.cfs
            .get(&id)
            .ok_or_else(|| Status::invalid_argument(format!("column family {id} does not exist")))
    }

    pub(crate) fn cf_state_mut(&mut self, id: u32) -> Result<&mut CfState> {
        self.cfs
            .get_mut(&id)
            .ok_or_else(|| Status::invalid_argument(format!("column family {id} does not exist")))
    }

    pub(crate) fn next_super_version_number(&mut self) -> u64 {
        self.super_version_number += 1;
        self.super_version_number
    }

    /// Publishes a fresh super version for `cf_id`.
    pub(crate) fn install_super_version(&mut self, cf_id: u32) {
        let number = self.next_super_version_number();
        if let Some(cf) = self.cfs.get(&cf_id) {
            cf.data.install_super_version(cf.make_super_version(number));
        }
    }

    pub(crate) fn manifest_file_size(&self) -> u64 {
        self.manifest.as_ref().map_or(0, WalWriter::file_size)
    }

    /// Oldest WAL that may still hold unflushed data of some family.
    pub(crate) fn min_log_number_to_keep(&self, current_log: u64) -> u64 {
        self.cfs
            .values()
            .map(|cf| {
                if cf.has_unflushed_data() {
                    cf.log_number
                } else {
                    current_log
                }
            })
            .min()
            .unwrap_or(current_log)
    }

    /// Files referenced by a current version or by an older version some
    /// reader still holds.
    pub(crate) fn live_files(&mut self) -> BTreeSet<u64> {
        self.old_versions.retain(|v| v.strong_count() > 0);
        let mut live: BTreeSet<u64> = self
            .cfs
            .values()
            .flat_map(|cf| cf.current.all_files().map(|(_, f)| f.number).collect::<Vec<_>>())
            .collect();
        for v in self.old_versions.iter().filter_map(Weak::upgrade) {
            live.extend(v.all_files().map(|(_, f)| f.number));
        }
        live
    }

    /// Versions of `cf_id` still alive, current first.
    pub(crate) fn live_versions(&self, cf_id: u32) -> Vec<Arc<Version>> {
        let mut out: Vec<Arc<Version>> = self
            .cfs
            .get(&cf_id)
            .map(|cf| vec![Arc::clone(&cf.current)])
            .unwrap_or_default();
        out.extend(
            self.old_versions
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|v| v.cf_id == cf_id),
        );
        out
    }

    /// Files referenced by the current versions only.
    pub(crate) fn current_files(&self) -> BTreeSet<u64> {
        self.cfs
            .values()
            .flat_map(|cf| cf.current.all_files().map(|(_, f)| f.number).collect::<Vec<_>>())
            .collect()
    }

    fn snapshot_edits(&self, last_sequence: SequenceNumber) -> Vec<VersionEdit> {
        let mut edits = Vec::with_capacity(self.cfs.len());
        for cf in self.cfs.values() {
            let mut edit = VersionEdit::for_column_family(cf.id());
            if cf.id() != DEFAULT_CF_ID {
                edit.column_family_add = Some(cf.name().to_string());
            }
            edit.comparator = Some(cf.data.icmp.user_comparator().name().to_string());
            edit.log_number = Some(cf.log_number);
            for (level, f) in cf.current.all_files() {
                edit.add_file(level, (**f).clone());
            }
            edits.push(edit);
        }
        let mut globals = VersionEdit::new();
        globals.next_file_number = Some(self.next_file_number);
        globals.last_sequence = Some(last_sequence);
        globals.prev_log_number = Some(self.prev_log_number);
        globals.max_column_family = Some(self.max_column_family);
        edits.push(globals);
        edits
    }

    /// Starts a new MANIFEST holding a snapshot of the current state and
    /// points `CURRENT` at it.
    pub(crate) fn create_new_manifest(&mut self, last_sequence: SequenceNumber) -> Result<()> {
        let number = self.new_file_number();
        let path = manifest_file_path(&self.dir, number);
        let result = (|| {
            let mut writer = WalWriter::create(&path, false)?;
            for edit in self.snapshot_edits(last_sequence) {
                writer.append(&edit.encode())?;
            }
            writer.sync_to_disk()?;
            set_current_file(&self.dir, number)?;
            Ok(writer)
        })();
        match result {
            Ok(writer) => {
                self.manifest = Some(writer);
                self.manifest_file_number = number;
                self.last_sequence = last_sequence;
                info!(manifest = number, "new manifest installed");
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Appends `edits` to the MANIFEST and syncs it. After a failed append
    /// the next call starts a new MANIFEST instead of writing after a torn
    /// record.
    pub(crate) fn write_edits(
        &mut self,
        edits: &mut [VersionEdit],
        last_sequence: SequenceNumber,
    ) -> Result<()> {
        if self.manifest.is_none() {
            self.create_new_manifest(last_sequence)?;
        }
        if let Some(last) = edits.last_mut() {
            last.next_file_number = Some(self.next_file_number);
            last.last_sequence = Some(last_sequence);
        }
        let Some(writer) = self.manifest.as_mut() else {
            return Err(Status::io_error("manifest is not open"));
        };
        let result = (|| {
            for edit in edits.iter() {
                writer.append(&edit.encode())?;
            }
            writer.sync_to_disk()
        })();
        if let Err(e) = result {
            warn!(error = %e, "manifest write failed");
            self.manifest = None;
            return Err(e);
        }
        self.last_sequence = last_sequence;
        Ok(())
    }

    /// Installs the file and log-number changes of `edit` into its family.
    pub(crate) fn apply_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        let cf = self.cf_state_mut(edit.column_family)?;
        let replaced = if edit.has_file_changes() {
            let next = Arc::new(cf.current.apply(edit)?);
            Some(std::mem::replace(&mut cf.current, next))
        } else {
            None
        };
        if let Some(n) = edit.log_number {
            cf.log_number = cf.log_number.max(n);
        }
        if let Some(old) = replaced {
            self.old_versions.push(Arc::downgrade(&old));
        }
        Ok(())
    }

    /// Persists `edits` and applies them in order.
    pub(crate) fn log_and_apply(
        &mut self,
        mut edits: Vec<VersionEdit>,
        last_sequence: SequenceNumber,
    ) -> Result<()> {
        self.write_edits(&mut edits, last_sequence)?;
        for edit in &edits {
            self.apply_edit(edit)?;
            self.install_super_version(edit.column_family);
        }
        Ok(())
    }

    /// Forgets a dropped family. Its files stay live while readers still
    /// hold its last version.
    pub(crate) fn remove_column_family(&mut self, id: u32) -> Option<CfState> {
        let cf = self.cfs.remove(&id)?;
        self.old_versions.push(Arc::downgrade(&cf.current));
        Some(cf)
    }

    pub(crate) fn close_manifest(&mut self) -> Result<()> {
        if let Some(mut writer) = self.manifest.take() {
            writer.sync_to_disk()?;
        }
        Ok(())
    }
}
