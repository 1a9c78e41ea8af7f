use crate::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// -------------------- Block size --------------------

#[test]
fn block_size_in_range_is_kept() {
    for bs in [2048, 4096, 8192, 16384, 32768, 65536] {
        assert_eq!(normalize_block_size(bs), bs);
    }
}

#[test]
fn block_size_out_of_range_or_odd_falls_back() {
    for bs in [0, 1024, 3000, 131072, 6144] {
        assert_eq!(normalize_block_size(bs), DEFAULT_BLOCK_SIZE, "block size {}", bs);
    }
    let opts = CompactOptions::new(100, CompactionLevel::Standard, CompactFlags::default());
    assert_eq!(opts.block_size(), DEFAULT_BLOCK_SIZE);
}

// -------------------- Level & sync --------------------

#[test]
fn fullest_caps_item_size() {
    let mut opts = CompactOptions::default();
    assert!(!opts.full_blocks());
    assert_eq!(opts.max_item_size(), None);

    opts.level = CompactionLevel::Full;
    assert!(opts.full_blocks());
    assert_eq!(opts.max_item_size(), None);

    opts.level = CompactionLevel::Fullest;
    assert!(opts.full_blocks());
    assert_eq!(opts.max_item_size(), Some(1));
}

#[test]
fn sync_mode_from_flags() {
    let mut flags = CompactFlags::default();
    assert_eq!(flags.sync_mode(), SyncMode::Normal);
    flags.full_sync = true;
    assert_eq!(flags.sync_mode(), SyncMode::Full);
    flags.no_sync = true;
    assert_eq!(flags.sync_mode(), SyncMode::None);
}

// -------------------- Environment overlay --------------------

#[test]
fn overlay_applies_known_variables() {
    let opts = CompactOptions::default().overlay(lookup_from(&[
        ("SEGCOMPACT_BLOCK_SIZE", "16384"),
        ("SEGCOMPACT_LEVEL", "Fullest"),
        ("SEGCOMPACT_MULTIPASS", "true"),
        ("SEGCOMPACT_NO_SYNC", "true"),
        ("SEGCOMPACT_TMP_DIR", "/var/tmp/compact"),
    ]));
    assert_eq!(opts.block_size(), 16384);
    assert_eq!(opts.level, CompactionLevel::Fullest);
    assert!(opts.flags.multipass);
    assert!(opts.flags.no_sync);
    assert!(!opts.flags.single_file);
    assert_eq!(opts.tmp_dir, Some(std::path::PathBuf::from("/var/tmp/compact")));
}

#[test]
fn overlay_ignores_garbage() {
    let opts = CompactOptions::default().overlay(lookup_from(&[
        ("SEGCOMPACT_BLOCK_SIZE", "lots"),
        ("SEGCOMPACT_LEVEL", "maximum"),
        ("SEGCOMPACT_SINGLE_FILE", "yes please"),
    ]));
    assert_eq!(opts, CompactOptions::default());
}

#[test]
fn overlay_normalizes_block_size() {
    let opts = CompactOptions::default().overlay(lookup_from(&[("SEGCOMPACT_BLOCK_SIZE", "1000")]));
    assert_eq!(opts.block_size(), DEFAULT_BLOCK_SIZE);
}
