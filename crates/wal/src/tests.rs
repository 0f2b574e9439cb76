use super::*;
use anyhow::Result;
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn write_records(path: &Path, payloads: &[&[u8]]) -> Result<()> {
    let mut w = WalWriter::create(path, true)?;
    for p in payloads {
        w.append(p)?;
    }
    Ok(())
}

fn replay_all(path: &Path, mode: WalRecoveryMode) -> types::Result<Vec<Vec<u8>>> {
    let mut reader = WalReader::open(path, mode)?;
    let mut recs = Vec::new();
    reader.replay(|r| {
        recs.push(r.to_vec());
        Ok(())
    })?;
    Ok(recs)
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u32 + 4).to_le_bytes());
    let mut h = Crc32::new();
    h.update(payload);
    out.extend_from_slice(&h.finalize().to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Three frames where the middle one has a flipped payload byte.
fn corrupt_middle() -> Vec<u8> {
    let mut data = frame(b"first");
    let mut bad = frame(b"second");
    let last = bad.len() - 1;
    bad[last] ^= 0xff;
    data.extend_from_slice(&bad);
    data.extend_from_slice(&frame(b"third"));
    data
}

fn replay_bytes(data: &[u8], mode: WalRecoveryMode) -> (types::Result<Vec<Vec<u8>>>, bool) {
    let mut reader = WalReader::from_reader(Cursor::new(data.to_vec()), mode);
    let mut recs = Vec::new();
    let res = reader.replay(|r| {
        recs.push(r.to_vec());
        Ok(())
    });
    (res.map(|_| recs), reader.corruption_seen())
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay_in_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"one", b"two", b"three"])?;

    let recs = replay_all(&path, WalRecoveryMode::default())?;
    assert_eq!(recs, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    Ok(())
}

#[test]
fn reopening_appends_and_tracks_size() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000002.log");
    write_records(&path, &[b"a"])?;

    let mut w = WalWriter::create(&path, false)?;
    assert_eq!(w.file_size(), (FRAME_HEADER_LEN + 1) as u64);
    w.append(b"bc")?;
    w.sync_to_disk()?;
    assert_eq!(w.file_size(), fs::metadata(&path)?.len());

    let recs = replay_all(&path, WalRecoveryMode::default())?;
    assert_eq!(recs, vec![b"a".to_vec(), b"bc".to_vec()]);
    Ok(())
}

#[test]
fn empty_log_replays_nothing() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000003.log");
    write_records(&path, &[])?;
    assert!(replay_all(&path, WalRecoveryMode::default())?.is_empty());
    Ok(())
}

#[test]
fn batch_survives_the_log() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000004.log");
    let mut batch = WriteBatch::new();
    batch.put(b"k", b"v");
    batch.delete(b"gone");
    batch.set_sequence(77);
    write_records(&path, &[batch.data()])?;

    let recs = replay_all(&path, WalRecoveryMode::default())?;
    let back = WriteBatch::from_data(recs[0].clone())?;
    assert_eq!(back.sequence(), 77);
    assert_eq!(back.count(), 2);
    assert_eq!(back.data(), batch.data());
    Ok(())
}

// -------------------- Torn tail --------------------

#[test]
fn truncated_tail_is_tolerated_by_default() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000005.log");
    write_records(&path, &[b"k1", b"k2"])?;

    // a header promising 32 bytes that never arrive
    let mut data = fs::read(&path)?;
    data.extend_from_slice(&[0x20, 0x00, 0x00, 0x00]);
    fs::write(&path, &data)?;

    let recs = replay_all(&path, WalRecoveryMode::TolerateCorruptedTailRecords)?;
    assert_eq!(recs, vec![b"k1".to_vec(), b"k2".to_vec()]);
    Ok(())
}

#[test]
fn truncated_tail_fails_absolute_consistency() -> Result<()> {
    let mut data = frame(b"whole");
    let partial = frame(b"partial-record");
    data.extend_from_slice(&partial[..partial.len() - 3]);

    let (res, _) = replay_bytes(&data, WalRecoveryMode::AbsoluteConsistency);
    assert!(res.unwrap_err().is_corruption());

    let (res, _) = replay_bytes(&data, WalRecoveryMode::PointInTimeRecovery);
    assert_eq!(res?, vec![b"whole".to_vec()]);
    Ok(())
}

#[test]
fn one_stray_byte_is_a_torn_header() -> Result<()> {
    let mut data = frame(b"x");
    data.push(0x07);
    let (res, corrupted) = replay_bytes(&data, WalRecoveryMode::default());
    assert_eq!(res?, vec![b"x".to_vec()]);
    assert!(!corrupted);
    Ok(())
}

// -------------------- Mid-file corruption --------------------

#[test]
fn checksum_mismatch_fails_tolerant_mode() {
    let (res, _) = replay_bytes(&corrupt_middle(), WalRecoveryMode::TolerateCorruptedTailRecords);
    assert!(res.unwrap_err().is_corruption());
}

#[test]
fn point_in_time_stops_at_first_damage() -> Result<()> {
    let (res, corrupted) = replay_bytes(&corrupt_middle(), WalRecoveryMode::PointInTimeRecovery);
    assert_eq!(res?, vec![b"first".to_vec()]);
    assert!(corrupted);
    Ok(())
}

#[test]
fn skip_mode_skips_only_the_bad_record() -> Result<()> {
    let (res, corrupted) =
        replay_bytes(&corrupt_middle(), WalRecoveryMode::SkipAnyCorruptedRecords);
    assert_eq!(res?, vec![b"first".to_vec(), b"third".to_vec()]);
    assert!(corrupted);
    Ok(())
}

#[test]
fn absurd_length_is_corruption() {
    let mut data = frame(b"ok");
    data.extend_from_slice(&u32::MAX.to_le_bytes());
    data.extend_from_slice(&[0u8; 16]);
    let (res, _) = replay_bytes(&data, WalRecoveryMode::default());
    assert!(res.unwrap_err().is_corruption());
}

#[test]
fn apply_error_aborts_replay() {
    let data = [frame(b"a"), frame(b"b")].concat();
    let mut reader = WalReader::from_reader(Cursor::new(data), WalRecoveryMode::default());
    let mut seen = 0;
    let err = reader
        .replay(|_| {
            seen += 1;
            Err(Status::corruption("bad batch"))
        })
        .unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(seen, 1);
}

#[test]
fn recovery_mode_names_parse() {
    for mode in [
        WalRecoveryMode::TolerateCorruptedTailRecords,
        WalRecoveryMode::AbsoluteConsistency,
        WalRecoveryMode::PointInTimeRecovery,
        WalRecoveryMode::SkipAnyCorruptedRecords,
    ] {
        assert_eq!(WalRecoveryMode::parse(mode.as_str()), Some(mode));
    }
    assert_eq!(
        WalRecoveryMode::parse("2"),
        Some(WalRecoveryMode::PointInTimeRecovery)
    );
    assert_eq!(WalRecoveryMode::parse("kSometimes"), None);
}

// -------------------- WriteBatch --------------------

#[derive(Default)]
struct Recorder {
    ops: Vec<String>,
    stop_after: Option<usize>,
}

impl Handler for Recorder {
    fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> types::Result<()> {
        self.ops.push(format!(
            "put({cf},{},{})",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        ));
        Ok(())
    }
    fn delete_cf(&mut self, cf: u32, key: &[u8]) -> types::Result<()> {
        self.ops
            .push(format!("del({cf},{})", String::from_utf8_lossy(key)));
        Ok(())
    }
    fn single_delete_cf(&mut self, cf: u32, key: &[u8]) -> types::Result<()> {
        self.ops
            .push(format!("sdel({cf},{})", String::from_utf8_lossy(key)));
        Ok(())
    }
    fn merge_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) -> types::Result<()> {
        self.ops.push(format!(
            "merge({cf},{},{})",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        ));
        Ok(())
    }
    fn delete_range_cf(&mut self, cf: u32, begin: &[u8], end: &[u8]) -> types::Result<()> {
        self.ops.push(format!(
            "range({cf},{},{})",
            String::from_utf8_lossy(begin),
            String::from_utf8_lossy(end)
        ));
        Ok(())
    }
    fn log_data(&mut self, blob: &[u8]) {
        self.ops
            .push(format!("log({})", String::from_utf8_lossy(blob)));
    }
    fn mark_commit(&mut self, xid: &[u8]) -> types::Result<()> {
        self.ops
            .push(format!("commit({})", String::from_utf8_lossy(xid)));
        Ok(())
    }
    fn should_continue(&self) -> bool {
        self.stop_after.map_or(true, |n| self.ops.len() < n)
    }
}

#[test]
fn batch_replays_records_in_insertion_order() -> Result<()> {
    let mut b = WriteBatch::new();
    b.put(b"a", b"1");
    b.merge_cf(3, b"m", b"+1");
    b.put_log_data(b"blob");
    b.delete_range(b"c", b"f");
    b.single_delete(b"s");
    b.delete_cf(2, b"d");
    b.mark_commit(b"tx1");

    assert_eq!(b.count(), 5);
    let mut r = Recorder::default();
    b.iterate(&mut r)?;
    assert_eq!(
        r.ops,
        vec![
            "put(0,a,1)",
            "merge(3,m,+1)",
            "log(blob)",
            "range(0,c,f)",
            "sdel(0,s)",
            "del(2,d)",
            "commit(tx1)",
        ]
    );
    assert_eq!(b.column_families()?, vec![0, 3, 2]);
    Ok(())
}

#[test]
fn handler_can_stop_iteration_early() -> Result<()> {
    let mut b = WriteBatch::new();
    for i in 0..5 {
        b.put(format!("k{i}"), b"v");
    }
    let mut r = Recorder {
        stop_after: Some(2),
        ..Default::default()
    };
    b.iterate(&mut r)?;
    assert_eq!(r.ops.len(), 2);
    Ok(())
}

#[test]
fn content_flags_follow_records() -> Result<()> {
    let mut b = WriteBatch::new();
    assert!(!b.has_put());
    b.put(b"k", b"v");
    b.merge(b"k", b"x");
    b.mark_begin_prepare();
    assert!(b.has_put() && b.has_merge() && b.has_begin_prepare());
    assert!(!b.has_delete() && !b.has_delete_range() && !b.has_commit());

    let back = WriteBatch::from_data(b.data().to_vec())?;
    assert!(back.has_put() && back.has_merge() && back.has_begin_prepare());
    assert!(!back.has_single_delete());
    Ok(())
}

#[test]
fn save_points_nest_and_roll_back() -> Result<()> {
    let mut b = WriteBatch::new();
    b.put(b"a", b"1");
    b.set_save_point();
    b.put(b"b", b"2");
    b.set_save_point();
    b.delete(b"a");
    assert_eq!(b.count(), 3);

    b.rollback_to_save_point()?;
    assert_eq!(b.count(), 2);
    assert!(!b.has_delete());

    b.rollback_to_save_point()?;
    assert_eq!(b.count(), 1);

    assert!(b.rollback_to_save_point().unwrap_err().is_not_found());
    assert!(b.pop_save_point().unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn pop_save_point_keeps_records() -> Result<()> {
    let mut b = WriteBatch::new();
    b.set_save_point();
    b.put(b"a", b"1");
    b.pop_save_point()?;
    assert_eq!(b.count(), 1);
    assert!(b.rollback_to_save_point().is_err());
    Ok(())
}

#[test]
fn append_concatenates_records() -> Result<()> {
    let mut leader = WriteBatch::new();
    leader.put(b"a", b"1");
    let mut follower = WriteBatch::new();
    follower.delete(b"b");
    follower.merge(b"c", b"x");

    leader.append(&follower);
    assert_eq!(leader.count(), 3);
    assert!(leader.has_delete() && leader.has_merge());

    let mut r = Recorder::default();
    leader.iterate(&mut r)?;
    assert_eq!(r.ops, vec!["put(0,a,1)", "del(0,b)", "merge(0,c,x)"]);
    Ok(())
}

#[test]
fn malformed_batches_are_corruption() {
    assert!(WriteBatch::from_data(vec![0; 5]).unwrap_err().is_corruption());

    let mut b = WriteBatch::new();
    b.put(b"key", b"value");
    let mut data = b.data().to_vec();
    data.truncate(data.len() - 2);
    assert!(WriteBatch::from_data(data).unwrap_err().is_corruption());

    let mut data = b.data().to_vec();
    data[8] = 9; // count says nine records
    assert!(WriteBatch::from_data(data).unwrap_err().is_corruption());

    let mut data = WriteBatch::new().data().to_vec();
    data.push(0x42);
    assert!(WriteBatch::from_data(data).unwrap_err().is_corruption());
}

#[test]
fn clear_resets_everything() {
    let mut b = WriteBatch::new();
    b.set_sequence(9);
    b.put(b"k", b"v");
    b.set_save_point();
    b.clear();
    assert!(b.is_empty());
    assert_eq!(b.count(), 0);
    assert_eq!(b.sequence(), 0);
    assert!(!b.has_put());
}
