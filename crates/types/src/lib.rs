//! # Types - shared vocabulary of the RiptideDB workspace
//!
//! Everything the storage crates have to agree on lives here:
//!
//! | Module                | Contents                                              |
//! |-----------------------|-------------------------------------------------------|
//! | [`status`]            | `Status` error type, `Code`, `SubCode`, `Result`       |
//! | [`key`]               | sequence numbers, `ValueType`, internal key encoding   |
//! | [`comparator`]        | `Comparator` trait, bytewise and reverse comparators   |
//! | [`merge_operator`]    | `MergeOperator`, `AssociativeMergeOperator`            |
//! | [`compaction_filter`] | `CompactionFilter`, `Decision`, filter factories       |
//! | [`slice_transform`]   | prefix extractors                                      |
//! | [`iterator`]          | `InternalIterator` cursor trait                        |
//! | [`get_context`]       | point-lookup state machine                             |
//! | [`range_del`]         | range tombstones and fragmentation                     |
//! | [`listener`]          | `EventListener` and job info structs                   |
//! | [`rate_limiter`]      | token bucket for background I/O                        |
//! | [`env`]               | clock capability                                       |

pub mod comparator;
pub mod compaction_filter;
pub mod env;
pub mod get_context;
pub mod iterator;
pub mod key;
pub mod listener;
pub mod merge_operator;
pub mod range_del;
pub mod rate_limiter;
pub mod slice_transform;
pub mod status;
pub mod table_properties;

pub use comparator::{
    builtin_comparator, bytewise_comparator, reverse_bytewise_comparator, BytewiseComparator,
    Comparator, ReverseBytewiseComparator,
};
pub use compaction_filter::{
    CompactionFilter, CompactionFilterContext, CompactionFilterFactory, Decision, FilterValueType,
};
pub use env::{default_env, Env, ManualClock, SystemEnv};
pub use get_context::{GetContext, GetState};
pub use iterator::{EmptyIterator, InternalIterator, VecIterator};
pub use key::{
    extract_user_key, make_internal_key, parse_internal_key, InternalKey, InternalKeyComparator,
    LookupKey, ParsedInternalKey, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER,
};
pub use listener::EventListener;
pub use merge_operator::{
    Associative, AssociativeMergeOperator, MergeOperator, StringAppendOperator, UInt64AddOperator,
};
pub use range_del::{FragmentedRangeTombstones, RangeTombstone};
pub use rate_limiter::RateLimiter;
pub use slice_transform::SliceTransform;
pub use status::{Code, Result, Status, SubCode};
pub use table_properties::TableProperties;

#[cfg(test)]
mod tests;
