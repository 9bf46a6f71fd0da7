//! Fsck integration tests: orphan removal, pagination, backfill, and
//! idempotency, driven against directory trees built both through the
//! engine and behind its back.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use kozane_core::{KeyValueStore, ManualClock};
use kozane_storage::{FileStore, PAGE_CAPACITY};

const SECOND: i64 = 1_000_000_000;
/// 2023-01-01T00:00:00Z in nanoseconds.
const BASE: i64 = 1_672_531_200_000_000_000;

fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Every regular file under `root`, root-relative with `/` separators.
fn all_files(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                out.push(
                    path.strip_prefix(root)
                        .unwrap()
                        .to_string_lossy()
                        .replace('\\', "/"),
                );
            }
        }
    }
    let mut out = Vec::new();
    if root.exists() {
        walk(root, root, &mut out);
    }
    out.sort();
    out
}

fn assert_files(root: &Path, expected: &[String]) {
    let mut expected = expected.to_vec();
    expected.sort();
    assert_eq!(all_files(root), expected);
}

#[tokio::test]
async fn fsck_preserves_engine_written_state() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(BASE));
    let store = FileStore::new(dir.path()).with_clock(clock.clone());

    let v1 = store.set("simple_key", b"simple value").await.unwrap().unwrap();
    clock.advance(std::time::Duration::from_secs(3));
    let v2 = store
        .set("multi/level/key", b"multi level value")
        .await
        .unwrap()
        .unwrap();
    clock.advance(std::time::Duration::from_secs(5));
    let v3 = store
        .set("simple_key", b"updated simple value")
        .await
        .unwrap()
        .unwrap();

    let expected = vec![
        "simple_key".to_string(),
        "multi/level/key".to_string(),
        format!(".history/simple_key.h/{v1}"),
        format!(".history/simple_key.h/{v3}"),
        format!(".history/multi/level/key.h/{v2}"),
    ];
    assert_files(dir.path(), &expected);

    store.fsck().await.unwrap();
    assert_files(dir.path(), &expected);
}

#[tokio::test]
async fn fsck_removes_orphaned_histories() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write_file(root, "key1", b"value1");
    write_file(root, ".history/key1.h/1672531203000000000", b"abc");
    // No live key2: the whole history directory is an orphan, its pages
    // included.
    write_file(root, ".history/key2.h/1672531200000000000", b"abc");
    write_file(root, ".history/key2.h/1672531201000000000", b"abc");
    write_file(root, ".history/key2.h/p_100/100", b"abc");
    // Nested namespace: live key keeps its history, the dead sibling loses
    // its own.
    write_file(root, "multi/level/key", b"v");
    write_file(root, ".history/multi/level/key.h/1672531203000000000", b"v");
    write_file(root, ".history/multi/level/gone.h/1672531203000000000", b"v");

    let store = FileStore::new(root);
    store.fsck().await.unwrap();

    let expected = vec![
        "key1".to_string(),
        ".history/key1.h/1672531203000000000".to_string(),
        "multi/level/key".to_string(),
        ".history/multi/level/key.h/1672531203000000000".to_string(),
    ];
    assert_files(root, &expected);
}

#[tokio::test]
async fn fsck_backfills_missing_histories() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write_file(root, "key1", b"value1");
    write_file(root, "key2", b"value2");
    write_file(root, "multi/level/key", b"multi value");

    let clock = Arc::new(ManualClock::new(BASE));
    let store = FileStore::new(root).with_clock(clock);
    store.fsck().await.unwrap();

    let expected = vec![
        "key1".to_string(),
        "key2".to_string(),
        "multi/level/key".to_string(),
        format!(".history/key1.h/{BASE}"),
        format!(".history/key2.h/{BASE}"),
        format!(".history/multi/level/key.h/{BASE}"),
    ];
    assert_files(root, &expected);

    // Backfilled snapshots carry the live content.
    let snapshot = store
        .get_by_version("multi/level/key", &BASE.to_string())
        .await
        .unwrap();
    assert_eq!(&snapshot[..], b"multi value");
}

#[tokio::test]
async fn fsck_paginates_oversized_histories() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let key = "key1";
    let count = 450usize;

    write_file(root, key, b"value1");
    let versions: Vec<String> = (0..count)
        .map(|i| (BASE + i as i64 * SECOND).to_string())
        .collect();
    for version in &versions {
        write_file(root, &format!(".history/{key}.h/{version}"), version.as_bytes());
    }

    let store = FileStore::new(root);

    let before = store.get_histories(key).await.unwrap();
    assert_eq!(before.len(), count);

    store.fsck().await.unwrap();

    // Two full pages of the oldest snapshots, the newest 50 left in the
    // default location.
    let mut expected = vec![key.to_string()];
    for (i, version) in versions.iter().enumerate() {
        let rel = if i < PAGE_CAPACITY {
            format!(".history/{key}.h/p_{}/{version}", versions[0])
        } else if i < 2 * PAGE_CAPACITY {
            format!(".history/{key}.h/p_{}/{version}", versions[PAGE_CAPACITY])
        } else {
            format!(".history/{key}.h/{version}")
        };
        expected.push(rel);
    }
    assert_files(root, &expected);

    // Every snapshot is still reachable, in ascending order.
    let after = store.get_histories(key).await.unwrap();
    assert_eq!(after.len(), count);
    let listed: Vec<&str> = after.iter().map(|r| r.version.as_str()).collect();
    let wanted: Vec<&str> = versions.iter().map(String::as_str).collect();
    assert_eq!(listed, wanted);

    // Spot-check a paged version read.
    let paged = store.get_by_version(key, &versions[10]).await.unwrap();
    assert_eq!(&paged[..], versions[10].as_bytes());
}

#[tokio::test]
async fn fsck_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write_file(root, "key1", b"value1");
    for i in 0..250i64 {
        let version = (BASE + i * SECOND).to_string();
        write_file(root, &format!(".history/key1.h/{version}"), b"x");
    }
    write_file(root, ".history/orphan.h/1000", b"x");
    write_file(root, "bare", b"y");

    let clock = Arc::new(ManualClock::new(BASE + 500 * SECOND));
    let store = FileStore::new(root).with_clock(clock);

    store.fsck().await.unwrap();
    let first = all_files(root);
    store.fsck().await.unwrap();
    assert_eq!(all_files(root), first);
}

#[tokio::test]
async fn fsck_moves_meta_files_with_their_snapshots() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let key = "key1";

    write_file(root, key, b"value1");
    let versions: Vec<String> = (0..250)
        .map(|i| (BASE + i as i64 * SECOND).to_string())
        .collect();
    for version in &versions {
        write_file(root, &format!(".history/{key}.h/{version}"), b"x");
    }
    // One meta inside the range that gets paged, one in the surviving tail.
    write_file(
        root,
        &format!(".history/{key}.h/{}.meta", versions[0]),
        b"k=paged\n",
    );
    write_file(
        root,
        &format!(".history/{key}.h/{}.meta", versions[240]),
        b"k=tail\n",
    );

    let store = FileStore::new(root);
    store.fsck().await.unwrap();

    let page = format!(".history/{key}.h/p_{}", versions[0]);
    assert!(root.join(&page).join(&versions[0]).is_file());
    assert!(root
        .join(&page)
        .join(format!("{}.meta", versions[0]))
        .is_file());
    assert!(root
        .join(format!(".history/{key}.h/{}.meta", versions[240]))
        .is_file());

    // The traversal still pairs the moved meta with its snapshot.
    let histories = store.get_histories(key).await.unwrap();
    let paged = histories.iter().find(|r| r.version == versions[0]).unwrap();
    assert!(paged.has_meta);
    assert_eq!(
        paged.meta.as_ref().unwrap().get("k").map(String::as_str),
        Some("paged")
    );
}

#[tokio::test]
async fn fsck_error_policy() {
    // A root entry whose name cannot be a key: backslash in the file name.
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_file(root, "bad\\key", b"x");
    write_file(root, "good", b"y");

    // Strict mode aborts before repairing anything.
    let strict = FileStore::new(root);
    assert!(strict.fsck().await.is_err());
    assert!(!root.join(".history/good.h").exists());

    // ignore_warnings still reports the bad key but repairs the good one.
    let lenient = FileStore::new(root).ignore_warnings(true);
    assert!(lenient.fsck().await.is_err());
    let good_history = all_files(&root.join(".history/good.h"));
    assert_eq!(good_history.len(), 1, "good key must be backfilled");
}
