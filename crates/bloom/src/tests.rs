use super::*;

fn keys(n: usize, prefix: &str) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("{prefix}{i:06}").into_bytes()).collect()
}

// -------------------- Construction --------------------

#[test]
fn small_sets_get_minimum_size() {
    let bf = BloomFilter::from_keys(&[b"a"], 10);
    assert_eq!(bf.num_bits(), MIN_BITS);
    assert_eq!(bf.num_probes(), 6);
}

#[test]
fn probe_count_is_clamped() {
    let bf = BloomFilter::from_keys(&keys(10, "k"), 100);
    assert_eq!(bf.num_probes(), MAX_PROBES);
    let bf = BloomFilter::from_keys(&keys(10, "k"), 1);
    assert_eq!(bf.num_probes(), 1);
}

#[test]
fn empty_filter_rejects_everything() {
    let bf = BloomFilter::from_hashes(&[], 10);
    assert!(!bf.may_contain(b"anything"));
}

// -------------------- Membership --------------------

#[test]
fn no_false_negatives() {
    let ks = keys(5_000, "key");
    let bf = BloomFilter::from_keys(&ks, 10);
    for k in &ks {
        assert!(bf.may_contain(k), "false negative for {:?}", k);
    }
}

#[test]
fn false_positive_rate_is_reasonable() {
    let bf = BloomFilter::from_keys(&keys(10_000, "present"), 10);
    let fp = keys(10_000, "absent")
        .iter()
        .filter(|k| bf.may_contain(k))
        .count();
    // about 1% expected at 10 bits per key; allow slack
    assert!(fp < 300, "too many false positives: {fp}");
}

#[test]
fn hash_and_key_probes_agree() {
    let bf = BloomFilter::from_keys(&[b"hello"], 10);
    assert!(bf.may_contain_hash(key_hash(b"hello")));
}

// -------------------- Encoding --------------------

#[test]
fn encode_decode_preserves_answers() {
    let ks = keys(1_000, "k");
    let bf = BloomFilter::from_keys(&ks, 10);
    let encoded = bf.encode();
    assert_eq!(encoded.len(), bf.encoded_len());

    let decoded = BloomFilter::decode(&encoded).expect("valid filter");
    assert_eq!(decoded, bf);
    for k in &ks {
        assert!(decoded.may_contain(k));
    }
}

#[test]
fn decode_rejects_truncated_or_inconsistent_input() {
    assert!(BloomFilter::decode(&[]).is_none());
    assert!(BloomFilter::decode(&[1, 2, 3]).is_none());

    let mut encoded = BloomFilter::from_keys(&[b"x"], 10).encode();
    encoded.remove(0);
    assert!(BloomFilter::decode(&encoded).is_none());

    let mut encoded = BloomFilter::from_keys(&[b"x"], 10).encode();
    let probes_at = encoded.len() - TRAILER_LEN;
    encoded[probes_at] = 0;
    assert!(BloomFilter::decode(&encoded).is_none());
}

#[test]
fn key_hash_is_deterministic_and_spreads() {
    assert_eq!(key_hash(b"abc"), key_hash(b"abc"));
    assert_ne!(key_hash(b"abc"), key_hash(b"abd"));
    assert_ne!(key_hash(b""), 0);
}
