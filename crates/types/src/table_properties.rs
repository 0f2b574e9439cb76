//! Statistics persisted in every table's properties block.

use crate::key::SequenceNumber;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub data_size: u64,
    pub index_size: u64,
    pub filter_size: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub num_data_blocks: u64,
    pub num_entries: u64,
    pub num_deletions: u64,
    pub num_merge_operands: u64,
    pub num_range_deletions: u64,
    pub format_version: u64,
    pub creation_time: u64,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub column_family_id: u32,
    pub column_family_name: String,
    pub comparator_name: String,
    pub merge_operator_name: String,
    pub prefix_extractor_name: String,
    pub filter_policy_name: String,
    pub compression_name: String,
    /// Whether the filter block holds whole user keys, not only prefixes.
    pub whole_key_filtering: bool,
}

impl TableProperties {
    /// Renders the properties as `name=value; ` pairs for diagnostics.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        format!(
            "# data blocks={}; # entries={}; # deletions={}; # merge operands={}; \
             # range deletions={}; raw key size={}; raw value size={}; data block size={}; \
             index block size={}; filter block size={}; column family={}; comparator={}; \
             merge operator={}; prefix extractor={}; ",
            self.num_data_blocks,
            self.num_entries,
            self.num_deletions,
            self.num_merge_operands,
            self.num_range_deletions,
            self.raw_key_size,
            self.raw_value_size,
            self.data_size,
            self.index_size,
            self.filter_size,
            self.column_family_name,
            self.comparator_name,
            self.merge_operator_name,
            self.prefix_extractor_name,
        )
    }
}
