//! Event callbacks and the job descriptions handed to them.
//!
//! Callbacks run on the thread performing the work (a background flush or
//! compaction worker, or the caller of `ingest_external_file`) without any
//! database lock held. They should return quickly.

use std::path::PathBuf;

use crate::key::SequenceNumber;
use crate::status::Status;
use crate::table_properties::TableProperties;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFileCreationReason {
    Flush,
    Compaction,
    Recovery,
    Ingestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionReason {
    #[default]
    Unknown,
    /// Level: number of L0 files reached `level0_file_num_compaction_trigger`.
    LevelL0FilesNum,
    /// Level: a level exceeds its target size.
    LevelMaxLevelSize,
    UniversalSizeAmplification,
    UniversalSizeRatio,
    /// Universal: number of sorted runs exceeds the trigger.
    UniversalSortedRunNum,
    /// FIFO: total size exceeds `max_table_files_size`.
    FifoMaxSize,
    /// FIFO with `allow_compaction`: too many small L0 files.
    FifoReduceNumFiles,
    ManualCompaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    WriteBufferFull,
    ManualFlush,
    GetLiveFiles,
    Shutdown,
    ExternalFileIngestion,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundErrorReason {
    Flush,
    Compaction,
    WriteCallback,
    MemTable,
}

#[derive(Debug, Clone)]
pub struct FlushJobInfo {
    pub cf_id: u32,
    pub cf_name: String,
    pub file_path: PathBuf,
    pub file_number: u64,
    pub thread_id: u64,
    pub job_id: u64,
    /// Writes were stalled or slowed while this flush ran.
    pub triggered_writes_slowdown: bool,
    pub triggered_writes_stop: bool,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub table_properties: TableProperties,
    pub flush_reason: FlushReason,
}

/// Counters gathered while a compaction runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionJobStats {
    pub elapsed_micros: u64,
    pub num_input_records: u64,
    pub num_input_files: u64,
    pub num_input_files_at_output_level: u64,
    pub num_output_records: u64,
    pub num_output_files: u64,
    pub is_manual_compaction: bool,
    pub total_input_bytes: u64,
    pub total_output_bytes: u64,
    /// Records dropped because a newer version of the key superseded them.
    pub num_records_replaced: u64,
    pub total_input_raw_key_bytes: u64,
    pub total_input_raw_value_bytes: u64,
    pub num_input_deletion_records: u64,
    /// Tombstones dropped because nothing older could still be observed.
    pub num_expired_deletion_records: u64,
    pub num_corrupt_keys: u64,
    pub num_single_del_fallthru: u64,
    pub num_single_del_mismatch: u64,
    pub num_filtered_records: u64,
    pub num_merged_operands: u64,
    pub num_range_del_drop_obsolete: u64,
    pub smallest_output_key_prefix: Vec<u8>,
    pub largest_output_key_prefix: Vec<u8>,
}

impl CompactionJobStats {
    /// Folds the counters of one subcompaction into this one.
    pub fn add(&mut self, other: &CompactionJobStats) {
        self.num_input_records += other.num_input_records;
        self.num_output_records += other.num_output_records;
        self.num_output_files += other.num_output_files;
        self.total_output_bytes += other.total_output_bytes;
        self.num_records_replaced += other.num_records_replaced;
        self.total_input_raw_key_bytes += other.total_input_raw_key_bytes;
        self.total_input_raw_value_bytes += other.total_input_raw_value_bytes;
        self.num_input_deletion_records += other.num_input_deletion_records;
        self.num_expired_deletion_records += other.num_expired_deletion_records;
        self.num_corrupt_keys += other.num_corrupt_keys;
        self.num_single_del_fallthru += other.num_single_del_fallthru;
        self.num_single_del_mismatch += other.num_single_del_mismatch;
        self.num_filtered_records += other.num_filtered_records;
        self.num_merged_operands += other.num_merged_operands;
        self.num_range_del_drop_obsolete += other.num_range_del_drop_obsolete;
    }
}

#[derive(Debug, Clone)]
pub struct CompactionJobInfo {
    pub cf_id: u32,
    pub cf_name: String,
    pub status: Result<(), Status>,
    pub thread_id: u64,
    pub job_id: u64,
    pub base_input_level: usize,
    pub output_level: usize,
    pub input_files: Vec<PathBuf>,
    pub output_files: Vec<PathBuf>,
    pub compaction_reason: CompactionReason,
    pub stats: CompactionJobStats,
}

#[derive(Debug, Clone)]
pub struct TableFileCreationInfo {
    pub db_name: PathBuf,
    pub cf_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub job_id: u64,
    pub table_properties: TableProperties,
    pub reason: TableFileCreationReason,
    pub status: Result<(), Status>,
}

#[derive(Debug, Clone)]
pub struct TableFileDeletionInfo {
    pub db_name: PathBuf,
    pub file_path: PathBuf,
    pub job_id: u64,
    pub status: Result<(), Status>,
}

#[derive(Debug, Clone)]
pub struct MemTableInfo {
    pub cf_name: String,
    pub first_seqno: SequenceNumber,
    pub earliest_seqno: SequenceNumber,
    pub num_entries: u64,
    pub num_deletes: u64,
}

#[derive(Debug, Clone)]
pub struct ExternalFileIngestionInfo {
    pub cf_name: String,
    pub external_file_path: PathBuf,
    pub internal_file_path: PathBuf,
    pub global_seqno: SequenceNumber,
    pub table_properties: TableProperties,
}

/// Observer of database events. Every method defaults to a no-op.
pub trait EventListener: Send + Sync {
    fn on_flush_begin(&self, _info: &FlushJobInfo) {}
    fn on_flush_completed(&self, _info: &FlushJobInfo) {}
    fn on_compaction_begin(&self, _info: &CompactionJobInfo) {}
    fn on_compaction_completed(&self, _info: &CompactionJobInfo) {}
    fn on_table_file_created(&self, _info: &TableFileCreationInfo) {}
    fn on_table_file_deleted(&self, _info: &TableFileDeletionInfo) {}
    fn on_memtable_sealed(&self, _info: &MemTableInfo) {}
    fn on_external_file_ingested(&self, _info: &ExternalFileIngestionInfo) {}
    fn on_column_family_handle_deletion_started(&self, _cf_name: &str) {}
    /// May replace `status` with `Ok(())` to suppress the error.
    fn on_background_error(&self, _reason: BackgroundErrorReason, _status: &mut Result<(), Status>) {}
}
