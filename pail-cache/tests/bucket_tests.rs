//! Integration tests for bucket operations.
//!
//! Covers the full entry lifecycle: write-through and read-back, disk
//! round-trips via unload, deletion, expiration (including the
//! lifetime-change rule), pruning, and digest determinism across key
//! makers and codecs.

use std::thread::sleep;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tempfile::TempDir;

use pail_cache::{
    Bucket, CacheError, CodecKind, CodecOptions, DefaultKeyMaker, KeyMaker, StreamingKeyMaker,
};

fn entry_files(dir: &TempDir) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    files
}

#[test]
fn test_get_set_unload_delete_scenario() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path()).build().unwrap();

    bucket.set("k", "v".to_string()).unwrap();
    assert_eq!(bucket.get("k").unwrap(), "v");

    // Unloading forces the next get through a disk round-trip, which must
    // agree with the in-memory result.
    bucket.unload_key("k").unwrap();
    assert_eq!(bucket.get("k").unwrap(), "v");

    bucket.delete("k").unwrap();
    assert!(matches!(
        bucket.get("k").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
    assert!(entry_files(&dir).is_empty());
}

#[test]
fn test_delete_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path()).build().unwrap();
    assert!(matches!(
        bucket.delete("never-stored").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
}

#[test]
fn test_contains_reflects_resolvability() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<i64> = Bucket::<i64>::builder(dir.path()).build().unwrap();
    assert!(!bucket.contains("k").unwrap());
    bucket.set("k", 9).unwrap();
    assert!(bucket.contains("k").unwrap());
    bucket.delete("k").unwrap();
    assert!(!bucket.contains("k").unwrap());
}

#[test]
fn test_round_trip_every_codec() {
    for codec in [CodecKind::Bincode, CodecKind::Json, CodecKind::MessagePack] {
        if !codec.is_available() {
            continue;
        }
        let dir = TempDir::new().unwrap();
        let mut bucket: Bucket<Vec<String>> = Bucket::<Vec<String>>::builder(dir.path())
            .codec(codec)
            .build()
            .unwrap();
        let value = vec!["alpha".to_string(), "beta".to_string()];
        bucket.set("k", value.clone()).unwrap();
        bucket.unload_key("k").unwrap();
        assert_eq!(bucket.get("k").unwrap(), value, "codec {}", codec.name());

        let files = entry_files(&dir);
        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].extension().unwrap().to_str().unwrap(),
            codec.file_extension()
        );
    }
}

#[test]
fn test_expiration_survives_disk_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<i64> = Bucket::<i64>::builder(dir.path())
        .codec(CodecKind::Json)
        .lifetime(Duration::hours(1))
        .build()
        .unwrap();
    bucket.set("k", 5).unwrap();
    bucket.unload_key("k").unwrap();
    // The stored expiration is an hour out, so the reload sees a live entry.
    assert_eq!(bucket.get("k").unwrap(), 5);
}

#[test]
fn test_same_key_different_codecs_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let mut json_bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .codec(CodecKind::Json)
        .build()
        .unwrap();
    let mut bin_bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .codec(CodecKind::Bincode)
        .build()
        .unwrap();

    json_bucket.set("k", "from-json".to_string()).unwrap();
    bin_bucket.set("k", "from-bincode".to_string()).unwrap();

    let files = entry_files(&dir);
    assert_eq!(files.len(), 2);
    // The digest is qualified by codec name, so even the stems differ.
    assert_ne!(files[0].file_stem(), files[1].file_stem());

    assert_eq!(json_bucket.get("k").unwrap(), "from-json");
    assert_eq!(bin_bucket.get("k").unwrap(), "from-bincode");
}

#[test]
fn test_digest_deterministic_across_bucket_instances() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut bucket_a: Bucket<i64> = Bucket::<i64>::builder(dir_a.path()).build().unwrap();
    let mut bucket_b: Bucket<i64> = Bucket::<i64>::builder(dir_b.path()).build().unwrap();

    bucket_a.set(&("compound", 1u8), 1).unwrap();
    bucket_b.set(&("compound", 1u8), 1).unwrap();

    assert_eq!(
        entry_files(&dir_a)[0].file_name(),
        entry_files(&dir_b)[0].file_name()
    );
}

#[test]
fn test_streaming_keymaker_produces_same_digests() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut buffered: Bucket<i64> = Bucket::<i64>::builder(dir_a.path())
        .keymaker(KeyMaker::Default(DefaultKeyMaker))
        .build()
        .unwrap();
    let mut streaming: Bucket<i64> = Bucket::<i64>::builder(dir_b.path())
        .keymaker(KeyMaker::Streaming(StreamingKeyMaker::new(8)))
        .build()
        .unwrap();

    let key = vec![("nested", vec![1i64, 2, 3]); 10];
    buffered.set(&key, 1).unwrap();
    streaming.set(&key, 1).unwrap();

    assert_eq!(
        entry_files(&dir_a)[0].file_name(),
        entry_files(&dir_b)[0].file_name()
    );
}

#[test]
fn test_expiration_boundary() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::milliseconds(80))
        .build()
        .unwrap();

    bucket.set("k", "v".to_string()).unwrap();
    // Well within the lifetime: still resolvable.
    assert_eq!(bucket.get("k").unwrap(), "v");

    sleep(StdDuration::from_millis(120));
    let err = bucket.get("k").unwrap_err();
    assert!(matches!(err, CacheError::KeyNotFound { .. }));
    // Expiration deletes the backing file as a side effect.
    assert!(entry_files(&dir).is_empty());
}

#[test]
fn test_expired_entry_detected_on_disk_load_too() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::milliseconds(40))
        .build()
        .unwrap();
    bucket.set("k", "v".to_string()).unwrap();
    bucket.unload_key("k").unwrap();

    sleep(StdDuration::from_millis(80));
    assert!(matches!(
        bucket.get("k").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
    assert!(entry_files(&dir).is_empty());
}

#[test]
fn test_lifetime_shrink_invalidates_live_entry() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::hours(2))
        .build()
        .unwrap();
    bucket.set("k", "v".to_string()).unwrap();

    // Elapsed time is far below the original two hours, but the entry was
    // written under a more permissive setting than the new one.
    bucket.set_lifetime(Some(Duration::minutes(5))).unwrap();
    assert!(matches!(
        bucket.get("k").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
    assert!(entry_files(&dir).is_empty());
}

#[test]
fn test_newly_imposed_lifetime_invalidates_unexpiring_entry() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path()).build().unwrap();
    bucket.set("k", "v".to_string()).unwrap();

    // Entries written without a lifetime carry no expiration; imposing a
    // lifetime afterwards retroactively invalidates them.
    bucket.set_lifetime(Some(Duration::hours(1))).unwrap();
    assert!(matches!(
        bucket.get("k").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
}

#[test]
fn test_lifetime_growth_keeps_entry_valid() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::minutes(5))
        .build()
        .unwrap();
    bucket.set("k", "v".to_string()).unwrap();

    // A longer lifetime means the stored expiration is earlier than the
    // newly computed one, which is not the lifetime-changed condition.
    bucket.set_lifetime(Some(Duration::hours(1))).unwrap();
    assert_eq!(bucket.get("k").unwrap(), "v");
}

#[test]
fn test_removing_lifetime_keeps_stored_expiration() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::milliseconds(60))
        .build()
        .unwrap();
    bucket.set("k", "v".to_string()).unwrap();

    bucket.set_lifetime(None).unwrap();
    assert_eq!(bucket.get("k").unwrap(), "v");

    // Without a cache lifetime, the entry still honors the expiration it
    // was written with.
    sleep(StdDuration::from_millis(100));
    assert!(matches!(
        bucket.get("k").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
}

#[test]
fn test_lifetime_components_form() {
    let dir = TempDir::new().unwrap();
    let bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime_components([("minutes", 2i64), ("seconds", 30)])
        .build()
        .unwrap();
    assert_eq!(bucket.lifetime(), Some(Duration::seconds(150)));
}

#[test]
fn test_prune_directory_reclaims_expired_only() {
    let dir = TempDir::new().unwrap();

    let mut short_lived: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::milliseconds(30))
        .build()
        .unwrap();
    short_lived.set("old-1", "a".to_string()).unwrap();
    short_lived.set("old-2", "b".to_string()).unwrap();

    let mut unexpiring: Bucket<String> = Bucket::<String>::builder(dir.path()).build().unwrap();
    unexpiring.set("live", "c".to_string()).unwrap();

    sleep(StdDuration::from_millis(70));

    let files_before = entry_files(&dir);
    assert_eq!(files_before.len(), 3);
    let total_bytes: u64 = files_before
        .iter()
        .map(|path| std::fs::metadata(path).unwrap().len())
        .sum();

    // A fresh bucket with no lifetime prunes on stored expirations alone.
    let mut pruner: Bucket<String> = Bucket::<String>::builder(dir.path()).build().unwrap();
    let stats = pruner.prune_directory().unwrap();
    assert_eq!(stats.files_removed, 2);

    // The live entry's file survived; the reclaimed bytes are exactly the
    // summed size of the two removed files.
    let files_after = entry_files(&dir);
    assert_eq!(files_after.len(), 1);
    let remaining_bytes: u64 = files_after
        .iter()
        .map(|path| std::fs::metadata(path).unwrap().len())
        .sum();
    assert_eq!(stats.bytes_reclaimed, total_bytes - remaining_bytes);
    assert_eq!(pruner.get("live").unwrap(), "c");
}

#[test]
fn test_prune_leaves_undecodable_files_untouched() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::milliseconds(20))
        .build()
        .unwrap();
    bucket.set("k", "v".to_string()).unwrap();

    // A foreign file with the codec's extension and a digest-shaped stem,
    // but undecodable content.
    let foreign = dir.path().join(format!(
        "{}.{}",
        "0123456789abcdef0123456789abcdef",
        CodecKind::Bincode.file_extension()
    ));
    std::fs::write(&foreign, b"\x02not a record").unwrap();

    sleep(StdDuration::from_millis(50));
    let stats = bucket.prune_directory().unwrap();
    assert_eq!(stats.files_removed, 1);
    assert!(foreign.exists());
}

#[test]
fn test_overwrite_refreshes_expiration() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .lifetime(Duration::milliseconds(120))
        .build()
        .unwrap();
    bucket.set("k", "first".to_string()).unwrap();
    sleep(StdDuration::from_millis(70));

    // Overwriting refreshes the expiration clock in place.
    bucket.set("k", "second".to_string()).unwrap();
    sleep(StdDuration::from_millis(70));
    assert_eq!(bucket.get("k").unwrap(), "second");
}

#[test]
fn test_streaming_keymaker_handles_large_keys() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<i64> = Bucket::<i64>::builder(dir.path())
        .keymaker(KeyMaker::Streaming(StreamingKeyMaker::new(64)))
        .build()
        .unwrap();
    let huge_key: Vec<u64> = (0..10_000).collect();
    bucket.set(&huge_key, 1).unwrap();
    assert_eq!(bucket.get(&huge_key).unwrap(), 1);
}

#[test]
fn test_json_options_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut bucket: Bucket<String> = Bucket::<String>::builder(dir.path())
        .codec(CodecKind::Json)
        .codec_options(CodecOptions::new().set("pretty", true))
        .build()
        .unwrap();
    bucket.set("k", "v".to_string()).unwrap();
    bucket.unload_key("k").unwrap();
    assert_eq!(bucket.get("k").unwrap(), "v");

    let files = entry_files(&dir);
    let contents = std::fs::read_to_string(&files[0]).unwrap();
    assert!(contents.contains('\n'));
}

#[test]
fn test_bincode_protocol_mismatch_is_key_not_found() {
    let dir = TempDir::new().unwrap();
    let mut writer: Bucket<String> = Bucket::<String>::builder(dir.path())
        .codec_options(CodecOptions::new().set("protocol", 2u64))
        .build()
        .unwrap();
    writer.set("k", "v".to_string()).unwrap();

    let mut reader: Bucket<String> = Bucket::<String>::builder(dir.path())
        .codec_options(CodecOptions::new().set("protocol", 1u64))
        .build()
        .unwrap();
    // The file decodes only under the protocol it was written with; an
    // incompatible configuration reads as an invalid key, and the file is
    // left in place.
    assert!(matches!(
        reader.get("k").unwrap_err(),
        CacheError::KeyNotFound { .. }
    ));
    assert_eq!(entry_files(&dir).len(), 1);
}
