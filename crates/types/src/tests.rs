use super::*;
use std::cmp::Ordering;
use std::io;
use std::sync::Arc;

// -------------------- Status --------------------

#[test]
fn status_display_includes_code_subcode_and_message() {
    let s = Status::no_space("disk full while writing 000012.sst");
    assert!(s.is_io_error());
    assert!(s.is_no_space());
    assert!(s.is_retryable());
    assert_eq!(
        s.to_string(),
        "IO error: No space left on device: disk full while writing 000012.sst"
    );
}

#[test]
fn status_context_prefixes_message() {
    let s = Status::corruption("bad block").context("000007.sst");
    assert!(s.is_corruption());
    assert_eq!(s.message(), Some("000007.sst: bad block"));
}

#[test]
fn io_error_conversion_maps_kinds() {
    let eof: Status = io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into();
    assert!(eof.is_corruption());

    let interrupted: Status = io::Error::new(io::ErrorKind::Interrupted, "eintr").into();
    assert!(interrupted.is_io_error());
    assert!(interrupted.is_retryable());

    let enospc: Status = io::Error::from_raw_os_error(libc::ENOSPC).into();
    assert!(enospc.is_no_space());
}

#[test]
fn exactly_one_code_is_active() {
    let s = Status::busy("write stall");
    assert!(s.is_busy());
    assert!(!s.is_try_again());
    assert!(!s.is_ok());
    assert!(Status::ok().is_ok());
}

// -------------------- Internal keys --------------------

#[test]
fn internal_key_roundtrips_through_parse() -> Result<()> {
    let ikey = make_internal_key(b"user", 42, ValueType::Merge);
    let parsed = parse_internal_key(&ikey)?;
    assert_eq!(parsed.user_key, b"user");
    assert_eq!(parsed.sequence, 42);
    assert_eq!(parsed.value_type, ValueType::Merge);
    Ok(())
}

#[test]
fn parse_rejects_short_and_unknown_type() {
    assert!(parse_internal_key(b"abc").unwrap_err().is_corruption());
    let mut ikey = make_internal_key(b"k", 1, ValueType::Value);
    let n = ikey.len();
    ikey[n - 8] = 0x55;
    assert!(parse_internal_key(&ikey).unwrap_err().is_corruption());
}

#[test]
fn internal_order_is_user_key_then_newest_first() {
    let icmp = InternalKeyComparator::new(bytewise_comparator());
    let a5 = make_internal_key(b"a", 5, ValueType::Value);
    let a9 = make_internal_key(b"a", 9, ValueType::Value);
    let b1 = make_internal_key(b"b", 1, ValueType::Value);
    assert_eq!(icmp.compare(&a9, &a5), Ordering::Less);
    assert_eq!(icmp.compare(&a5, &b1), Ordering::Less);

    let lookup = LookupKey::new(b"a", 9);
    assert_eq!(icmp.compare(lookup.internal_key(), &a9), Ordering::Less);
    assert_eq!(lookup.sequence(), 9);
}

#[test]
fn reverse_comparator_inverts_user_order() {
    let icmp = InternalKeyComparator::new(reverse_bytewise_comparator());
    let a = make_internal_key(b"a", 1, ValueType::Value);
    let b = make_internal_key(b"b", 1, ValueType::Value);
    assert_eq!(icmp.compare(&a, &b), Ordering::Greater);
}

#[test]
fn shortest_separator_stays_between_bounds() {
    let icmp = InternalKeyComparator::new(bytewise_comparator());
    let mut start = make_internal_key(b"abcdefg", 10, ValueType::Value);
    let limit = make_internal_key(b"abzzz", 3, ValueType::Value);
    let original = start.clone();
    icmp.find_shortest_separator(&mut start, &limit);
    assert!(start.len() < original.len());
    assert_eq!(icmp.compare(&original, &start), Ordering::Less);
    assert_eq!(icmp.compare(&start, &limit), Ordering::Less);
}

#[test]
fn short_successor_of_ff_prefix() {
    let mut key = vec![0xff, 0xff, 0x10, 0x20];
    BytewiseComparator.find_short_successor(&mut key);
    assert_eq!(key, vec![0xff, 0xff, 0x11]);
}

// -------------------- Merge operators --------------------

#[test]
fn associative_full_merge_folds_in_order() {
    let op = Associative(StringAppendOperator::default());
    let out = op.full_merge(b"k", Some(b"a"), &[b"b", b"c"]);
    assert_eq!(out.as_deref(), Some(&b"a,b,c"[..]));
}

#[test]
fn partial_merge_equivalence_for_associative_operator() {
    let op = Associative(UInt64AddOperator);
    let o1 = 1u64.to_le_bytes();
    let o2 = 2u64.to_le_bytes();
    let o3 = 3u64.to_le_bytes();

    let all = op.full_merge(b"k", None, &[&o1, &o2, &o3]);
    let left = op.partial_merge(b"k", &o1, &o2).expect("associative");
    let folded = op.full_merge(b"k", None, &[&left, &o3]);
    assert_eq!(all, folded);
    assert_eq!(all, Some(6u64.to_le_bytes().to_vec()));
}

#[test]
fn uint64_add_rejects_malformed_operand() {
    let op = Associative(UInt64AddOperator);
    assert!(op.full_merge(b"k", None, &[b"nope"]).is_none());
}

// -------------------- Prefix extractors --------------------

#[test]
fn fixed_prefix_domain_and_names() {
    let t = slice_transform::new_fixed_prefix_transform(3);
    assert_eq!(t.name(), "rocksdb.FixedPrefix.3");
    assert!(t.in_domain(b"abcd"));
    assert!(!t.in_domain(b"ab"));
    assert_eq!(t.transform(b"abcd"), b"abc");

    let parsed = slice_transform::builtin_slice_transform("rocksdb.CappedPrefix.2").unwrap();
    assert_eq!(parsed.transform(b"x"), b"x");
    assert_eq!(parsed.transform(b"xyz"), b"xy");
}

// -------------------- Range tombstones --------------------

#[test]
fn fragments_split_overlapping_tombstones() {
    let frags = FragmentedRangeTombstones::new(
        &[RangeTombstone::new("a", "e", 5), RangeTombstone::new("c", "g", 9)],
        bytewise_comparator(),
    );
    let f = frags.fragments();
    assert_eq!(f.len(), 3);
    assert_eq!(f[1].start, b"c");
    assert_eq!(f[1].seqs, vec![9, 5]);

    assert_eq!(frags.max_covering_seq(b"b", 100), 5);
    assert_eq!(frags.max_covering_seq(b"d", 100), 9);
    assert_eq!(frags.max_covering_seq(b"d", 6), 5);
    assert_eq!(frags.max_covering_seq(b"g", 100), 0);
    assert_eq!(frags.max_covering_seq(b"0", 100), 0);
}

#[test]
fn empty_range_is_ignored() {
    let frags =
        FragmentedRangeTombstones::new(&[RangeTombstone::new("k", "k", 3)], bytewise_comparator());
    assert!(frags.is_empty());
}

// -------------------- GetContext --------------------

#[test]
fn get_context_merges_down_to_base_value() -> Result<()> {
    let op: Arc<dyn MergeOperator> = Arc::new(Associative(StringAppendOperator::default()));
    let cmp = bytewise_comparator();
    let mut ctx = GetContext::new(cmp.as_ref(), Some(op.as_ref()), b"k", 100);

    assert!(ctx.save_value(&ParsedInternalKey::new(b"k", 7, ValueType::Merge), b"c"));
    assert!(ctx.save_value(&ParsedInternalKey::new(b"k", 6, ValueType::Merge), b"b"));
    assert!(!ctx.save_value(&ParsedInternalKey::new(b"k", 5, ValueType::Value), b"a"));
    assert_eq!(ctx.finish()?, Some(b"a,b,c".to_vec()));
    Ok(())
}

#[test]
fn get_context_respects_covering_range_tombstone() -> Result<()> {
    let cmp = bytewise_comparator();
    let mut ctx = GetContext::new(cmp.as_ref(), None, b"k", 100);
    ctx.update_covering_tombstone(10);
    assert!(!ctx.save_value(&ParsedInternalKey::new(b"k", 4, ValueType::Value), b"old"));
    assert_eq!(ctx.state(), GetState::Deleted);
    assert_eq!(ctx.finish()?, None);
    Ok(())
}

#[test]
fn merge_without_operator_is_invalid_argument() {
    let cmp = bytewise_comparator();
    let mut ctx = GetContext::new(cmp.as_ref(), None, b"k", 100);
    ctx.save_value(&ParsedInternalKey::new(b"k", 3, ValueType::Merge), b"x");
    assert!(ctx.finish().unwrap_err().is_invalid_argument());
}

// -------------------- Rate limiter --------------------

#[test]
fn rate_limiter_waits_on_manual_clock() {
    let clock = Arc::new(ManualClock::new(0));
    let limiter = RateLimiter::with_env(1000, 100_000, clock.clone());
    limiter.request(2500);
    assert_eq!(limiter.total_bytes_through(), 2500);
    // 1000 initial tokens, the remaining 1500 need at least 15 refill periods
    assert!(clock.now_micros() >= 1_500_000);
}
