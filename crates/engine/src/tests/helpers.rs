use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use config::Options;
use parking_lot::Mutex;
use types::listener::{ExternalFileIngestionInfo, FlushJobInfo, TableFileCreationInfo};
use types::EventListener;

pub fn options() -> Options {
    Options::new().create_if_missing(true)
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some(ext))
        .collect();
    out.sort();
    out
}

pub fn count_sst_files(dir: &Path) -> usize {
    files_with_extension(dir, "sst").len()
}

/// The log with the highest number that holds any bytes.
pub fn newest_nonempty_log(dir: &Path) -> PathBuf {
    files_with_extension(dir, "log")
        .into_iter()
        .rev()
        .find(|p| fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
        .expect("no non-empty log")
}

/// Polls `cond` until it holds or ten seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[derive(Default)]
pub struct RecordingListener {
    pub flushes_begun: AtomicUsize,
    pub flushes_completed: AtomicUsize,
    pub tables_created: AtomicUsize,
    pub ingested: Mutex<Vec<String>>,
    pub handles_released: Mutex<Vec<String>>,
}

impl EventListener for RecordingListener {
    fn on_flush_begin(&self, _info: &FlushJobInfo) {
        self.flushes_begun.fetch_add(1, Ordering::SeqCst);
    }

    fn on_flush_completed(&self, _info: &FlushJobInfo) {
        self.flushes_completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_table_file_created(&self, _info: &TableFileCreationInfo) {
        self.tables_created.fetch_add(1, Ordering::SeqCst);
    }

    fn on_external_file_ingested(&self, info: &ExternalFileIngestionInfo) {
        self.ingested.lock().push(info.cf_name.clone());
    }

    fn on_column_family_handle_deletion_started(&self, cf_name: &str) {
        self.handles_released.lock().push(cf_name.to_string());
    }
}
