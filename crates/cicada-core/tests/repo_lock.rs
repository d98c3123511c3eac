//! Process-exclusion behavior of the repo cache.

use anyhow::Result;

use cicada_core::cache::RepoCache;
use cicada_core::error::Error;
use cicada_core::lock::{LOCK_FILE_NAME, RepoLock};
use cicada_core::store::mem::MemStore;
use cicada_core::store::ObjectStore;

#[test]
fn opening_a_repository_takes_the_lock() -> Result<()> {
    let store = MemStore::with_user("Jane", "jane@example.com");
    let lock_path = store.metadata_dir().join(LOCK_FILE_NAME);

    let cache = RepoCache::open(store)?;
    let content = std::fs::read_to_string(&lock_path)?;
    assert_eq!(content, std::process::id().to_string());
    assert!(content.len() <= 10);

    let store = cache.close()?;
    assert!(!lock_path.exists(), "close releases the lock");
    drop(store);
    Ok(())
}

#[test]
fn a_held_repository_cannot_be_opened_again() -> Result<()> {
    let cache = RepoCache::open(MemStore::with_user("Jane", "jane@example.com"))?;

    // The same directory, locked by this (live) process.
    let err = RepoLock::acquire(cache.store().metadata_dir()).unwrap_err();
    let err: Error = err.into();
    assert!(matches!(err, Error::Locked { pid } if pid == std::process::id()));
    Ok(())
}

#[test]
fn a_stale_lock_of_a_dead_process_is_reclaimed() -> Result<()> {
    let store = MemStore::with_user("Jane", "jane@example.com");
    let dir = store.metadata_dir().to_path_buf();
    std::fs::create_dir_all(&dir)?;
    // 99999 is the classic never-alive test pid; keep it dead-sized
    // anyway by using a value far above any real pid_max.
    std::fs::write(dir.join(LOCK_FILE_NAME), "99999999")?;

    let cache = RepoCache::open(store)?;
    let content = std::fs::read_to_string(dir.join(LOCK_FILE_NAME))?;
    assert_eq!(
        content,
        std::process::id().to_string(),
        "the stale lock was removed and rewritten"
    );
    drop(cache);
    assert!(!dir.join(LOCK_FILE_NAME).exists());
    Ok(())
}
