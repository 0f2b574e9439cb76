//! Encoding of [`TableProperties`] into a properties block.
//!
//! Each property is one block entry, sorted by name. Numeric properties are
//! stored as `u64 LE`, textual ones as raw UTF-8. Unknown names are ignored
//! on read so newer writers stay readable.

use byteorder::{ByteOrder, LittleEndian};
use types::{Result, Status, TableProperties};

use crate::block::{Block, BlockBuilder};

pub const DATA_SIZE: &str = "rocksdb.data.size";
pub const INDEX_SIZE: &str = "rocksdb.index.size";
pub const FILTER_SIZE: &str = "rocksdb.filter.size";
pub const RAW_KEY_SIZE: &str = "rocksdb.raw.key.size";
pub const RAW_VALUE_SIZE: &str = "rocksdb.raw.value.size";
pub const NUM_DATA_BLOCKS: &str = "rocksdb.num.data.blocks";
pub const NUM_ENTRIES: &str = "rocksdb.num.entries";
pub const DELETED_KEYS: &str = "rocksdb.deleted.keys";
pub const MERGE_OPERANDS: &str = "rocksdb.merge.operands";
pub const NUM_RANGE_DELETIONS: &str = "rocksdb.num.range-deletions";
pub const FORMAT_VERSION: &str = "rocksdb.format.version";
pub const CREATION_TIME: &str = "rocksdb.creation.time";
pub const SMALLEST_SEQNO: &str = "rocksdb.smallest.seqno";
pub const LARGEST_SEQNO: &str = "rocksdb.largest.seqno";
pub const COLUMN_FAMILY_ID: &str = "rocksdb.column.family.id";
pub const COLUMN_FAMILY_NAME: &str = "rocksdb.column.family.name";
pub const COMPARATOR: &str = "rocksdb.comparator";
pub const MERGE_OPERATOR: &str = "rocksdb.merge.operator";
pub const PREFIX_EXTRACTOR: &str = "rocksdb.prefix.extractor.name";
pub const FILTER_POLICY: &str = "rocksdb.filter.policy";
pub const COMPRESSION: &str = "rocksdb.compression";
pub const WHOLE_KEY_FILTERING: &str = "rocksdb.block.based.table.whole.key.filtering";

pub fn encode_properties(props: &TableProperties) -> Vec<u8> {
    let mut entries: Vec<(&str, Vec<u8>)> = vec![
        (DATA_SIZE, props.data_size.to_le_bytes().to_vec()),
        (INDEX_SIZE, props.index_size.to_le_bytes().to_vec()),
        (FILTER_SIZE, props.filter_size.to_le_bytes().to_vec()),
        (RAW_KEY_SIZE, props.raw_key_size.to_le_bytes().to_vec()),
        (RAW_VALUE_SIZE, props.raw_value_size.to_le_bytes().to_vec()),
        (NUM_DATA_BLOCKS, props.num_data_blocks.to_le_bytes().to_vec()),
        (NUM_ENTRIES, props.num_entries.to_le_bytes().to_vec()),
        (DELETED_KEYS, props.num_deletions.to_le_bytes().to_vec()),
        (MERGE_OPERANDS, props.num_merge_operands.to_le_bytes().to_vec()),
        (NUM_RANGE_DELETIONS, props.num_range_deletions.to_le_bytes().to_vec()),
        (FORMAT_VERSION, props.format_version.to_le_bytes().to_vec()),
        (CREATION_TIME, props.creation_time.to_le_bytes().to_vec()),
        (SMALLEST_SEQNO, props.smallest_seqno.to_le_bytes().to_vec()),
        (LARGEST_SEQNO, props.largest_seqno.to_le_bytes().to_vec()),
        (COLUMN_FAMILY_ID, u64::from(props.column_family_id).to_le_bytes().to_vec()),
        (COLUMN_FAMILY_NAME, props.column_family_name.as_bytes().to_vec()),
        (COMPARATOR, props.comparator_name.as_bytes().to_vec()),
        (MERGE_OPERATOR, props.merge_operator_name.as_bytes().to_vec()),
        (PREFIX_EXTRACTOR, props.prefix_extractor_name.as_bytes().to_vec()),
        (FILTER_POLICY, props.filter_policy_name.as_bytes().to_vec()),
        (COMPRESSION, props.compression_name.as_bytes().to_vec()),
        (
            WHOLE_KEY_FILTERING,
            u64::from(props.whole_key_filtering).to_le_bytes().to_vec(),
        ),
    ];
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut builder = BlockBuilder::new();
    for (name, value) in &entries {
        builder.add(name.as_bytes(), value);
    }
    builder.finish()
}

fn read_u64(name: &str, value: &[u8]) -> Result<u64> {
    if value.len() != 8 {
        return Err(Status::corruption(format!("bad table property {name}")));
    }
    Ok(LittleEndian::read_u64(value))
}

fn read_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

pub fn decode_properties(block: &Block) -> Result<TableProperties> {
    let mut props = TableProperties::default();
    for (name, value) in block.entries() {
        let name = std::str::from_utf8(name)
            .map_err(|_| Status::corruption("table property name is not UTF-8"))?;
        match name {
            DATA_SIZE => props.data_size = read_u64(name, value)?,
            INDEX_SIZE => props.index_size = read_u64(name, value)?,
            FILTER_SIZE => props.filter_size = read_u64(name, value)?,
            RAW_KEY_SIZE => props.raw_key_size = read_u64(name, value)?,
            RAW_VALUE_SIZE => props.raw_value_size = read_u64(name, value)?,
            NUM_DATA_BLOCKS => props.num_data_blocks = read_u64(name, value)?,
            NUM_ENTRIES => props.num_entries = read_u64(name, value)?,
            DELETED_KEYS => props.num_deletions = read_u64(name, value)?,
            MERGE_OPERANDS => props.num_merge_operands = read_u64(name, value)?,
            NUM_RANGE_DELETIONS => props.num_range_deletions = read_u64(name, value)?,
            FORMAT_VERSION => props.format_version = read_u64(name, value)?,
            CREATION_TIME => props.creation_time = read_u64(name, value)?,
            SMALLEST_SEQNO => props.smallest_seqno = read_u64(name, value)?,
            LARGEST_SEQNO => props.largest_seqno = read_u64(name, value)?,
            COLUMN_FAMILY_ID => props.column_family_id = read_u64(name, value)? as u32,
            COLUMN_FAMILY_NAME => props.column_family_name = read_string(value),
            COMPARATOR => props.comparator_name = read_string(value),
            MERGE_OPERATOR => props.merge_operator_name = read_string(value),
            PREFIX_EXTRACTOR => props.prefix_extractor_name = read_string(value),
            FILTER_POLICY => props.filter_policy_name = read_string(value),
            COMPRESSION => props.compression_name = read_string(value),
            WHOLE_KEY_FILTERING => props.whole_key_filtering = read_u64(name, value)? != 0,
            _ => {}
        }
    }
    Ok(props)
}
