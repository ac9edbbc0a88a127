use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::model::{
    now_millis, parent_path, Branch, BranchState, OntoError, Timestamp, ROOT_BRANCH,
};
use crate::store::traits::BranchStore;

/// In-process mutual exclusion per branch path. Acquisition is non-blocking:
/// a second concurrent request for the same path fails immediately rather
/// than queuing, preserving the fail-fast contract. A single active writer
/// process owns all branch locks.
#[derive(Debug, Clone, Default)]
pub struct BranchLockManager {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Outcome of a lock attempt; never a blocking wait
pub enum LockAttempt {
    Acquired(BranchLock),
    AlreadyLocked,
}

/// Held branch lock, released on drop
#[derive(Debug)]
pub struct BranchLock {
    path: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl BranchLock {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for BranchLock {
    fn drop(&mut self) {
        self.held.lock().remove(&self.path);
    }
}

impl BranchLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, path: &str) -> LockAttempt {
        let mut held = self.held.lock();
        if held.contains(path) {
            return LockAttempt::AlreadyLocked;
        }
        held.insert(path.to_string());
        LockAttempt::Acquired(BranchLock {
            path: path.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    /// Acquire or fail with the stable lock-contention error
    pub fn lock_or_fail(&self, path: &str) -> Result<BranchLock, OntoError> {
        match self.try_lock(path) {
            LockAttempt::Acquired(lock) => Ok(lock),
            LockAttempt::AlreadyLocked => Err(OntoError::BranchLocked {
                path: path.to_string(),
            }),
        }
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.held.lock().contains(path)
    }
}

/// Create a branch at `path`. Non-root branches base off their parent's
/// current head; the root branch starts empty.
pub async fn create_branch<S: BranchStore + ?Sized>(
    store: &S,
    path: &str,
) -> Result<Branch, OntoError> {
    if store.load_branch(path).await?.is_some() {
        return Err(OntoError::BranchExists {
            path: path.to_string(),
        });
    }
    let now = now_millis();
    let branch = match parent_path(path) {
        None => {
            if path != ROOT_BRANCH {
                return Err(OntoError::BranchNotFound {
                    path: path.to_string(),
                });
            }
            Branch::new(path, now, now)
        }
        Some(parent) => {
            let parent_branch =
                store
                    .load_branch(parent)
                    .await?
                    .ok_or_else(|| OntoError::BranchNotFound {
                        path: parent.to_string(),
                    })?;
            Branch::new(path, parent_branch.head_timestamp, now)
        }
    };
    store.create_branch_doc(branch.clone()).await?;
    log::info!("created branch {}", path);
    Ok(branch)
}

/// Derived state of a branch against its parent. The root branch has no
/// parent; it reports BEHIND while any direct child carries unpromoted
/// content, and UP_TO_DATE otherwise.
pub async fn branch_state<S: BranchStore + ?Sized>(
    store: &S,
    path: &str,
) -> Result<BranchState, OntoError> {
    let branch = store
        .load_branch(path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: path.to_string(),
        })?;

    match branch.parent_path() {
        None => {
            let children = store.list_child_branches(path).await?;
            let behind = children.iter().any(|child| child.contains_content);
            Ok(BranchState::derive(false, behind))
        }
        Some(parent) => {
            let parent_branch =
                store
                    .load_branch(parent)
                    .await?
                    .ok_or_else(|| OntoError::BranchNotFound {
                        path: parent.to_string(),
                    })?;
            let behind = parent_branch.head_timestamp > branch.base_timestamp;
            Ok(BranchState::derive(branch.contains_content, behind))
        }
    }
}

/// State of `left` relative to `right`, for review tooling. The branches
/// must be in one lineage (one an ancestor of the other).
pub async fn relative_state<S: BranchStore + ?Sized>(
    store: &S,
    left: &str,
    right: &str,
) -> Result<BranchState, OntoError> {
    if right.starts_with(&format!("{}/", left)) {
        // left is the ancestor: it lags while the descendant chain carries
        // unpromoted content
        let (forward, behind) = descendant_drift(store, right, left).await?;
        Ok(BranchState::derive(behind, forward))
    } else if left.starts_with(&format!("{}/", right)) {
        let (forward, behind) = descendant_drift(store, left, right).await?;
        Ok(BranchState::derive(forward, behind))
    } else if left == right {
        Ok(BranchState::UpToDate)
    } else {
        Err(OntoError::BranchesNotRelated {
            source_path: left.to_string(),
            target_path: right.to_string(),
        })
    }
}

/// (descendant has unpromoted content, ancestor moved past the chain's base)
async fn descendant_drift<S: BranchStore + ?Sized>(
    store: &S,
    descendant: &str,
    ancestor: &str,
) -> Result<(bool, bool), OntoError> {
    let ancestor_branch =
        store
            .load_branch(ancestor)
            .await?
            .ok_or_else(|| OntoError::BranchNotFound {
                path: ancestor.to_string(),
            })?;

    // Walk the chain from the ancestor's direct child down to the descendant
    let mut forward = false;
    let mut top_base = None;
    let relative = &descendant[ancestor.len() + 1..];
    let mut cursor = ancestor.to_string();
    for segment in relative.split('/') {
        cursor = format!("{}/{}", cursor, segment);
        let branch = store
            .load_branch(&cursor)
            .await?
            .ok_or_else(|| OntoError::BranchNotFound {
                path: cursor.clone(),
            })?;
        if top_base.is_none() {
            top_base = Some(branch.base_timestamp);
        }
        forward = forward || branch.contains_content;
    }
    let behind = top_base.map_or(false, |base| ancestor_branch.head_timestamp > base);
    Ok((forward, behind))
}

/// Read-merge-write of branch metadata: the given keys are upserted/removed
/// and every other key survives untouched. No new branch version is created.
pub async fn update_branch_metadata<S: BranchStore + ?Sized>(
    store: &S,
    path: &str,
    upserts: BTreeMap<String, serde_json::Value>,
    removals: &[&str],
) -> Result<Branch, OntoError> {
    let mut branch = store
        .load_branch(path)
        .await?
        .ok_or_else(|| OntoError::BranchNotFound {
            path: path.to_string(),
        })?;
    for (key, value) in upserts {
        branch.metadata.insert(key, value);
    }
    for key in removals {
        branch.metadata.remove(*key);
    }
    store.put_branch(branch.clone()).await?;
    Ok(branch)
}

/// Allocate a commit timestamp: strictly after the branch head (and any
/// merge-source head) so timestamps stay monotonic and unique per lineage.
pub fn allocate_timestamp(head: Timestamp, floor: Timestamp) -> Timestamp {
    now_millis().max(head + 1).max(floor + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn second_lock_attempt_fails_fast() {
        let locks = BranchLockManager::new();
        let first = locks.lock_or_fail("MAIN/A").unwrap();
        let second = locks.lock_or_fail("MAIN/A");
        assert!(matches!(second, Err(OntoError::BranchLocked { .. })));
        drop(first);
        assert!(locks.lock_or_fail("MAIN/A").is_ok());
    }

    #[tokio::test]
    async fn sibling_paths_lock_independently() {
        let locks = BranchLockManager::new();
        let _a = locks.lock_or_fail("MAIN/A").unwrap();
        assert!(locks.lock_or_fail("MAIN/B").is_ok());
    }

    #[tokio::test]
    async fn create_branch_requires_existing_parent() {
        let store = MemoryStore::new();
        let err = create_branch(&store, "MAIN/A").await.unwrap_err();
        assert!(matches!(err, OntoError::BranchNotFound { .. }));

        create_branch(&store, "MAIN").await.unwrap();
        let child = create_branch(&store, "MAIN/A").await.unwrap();
        let root = store.load_branch("MAIN").await.unwrap().unwrap();
        assert_eq!(child.base_timestamp, root.head_timestamp);
    }

    #[tokio::test]
    async fn metadata_update_preserves_unrelated_keys() {
        let store = MemoryStore::new();
        create_branch(&store, "MAIN").await.unwrap();
        update_branch_metadata(
            &store,
            "MAIN",
            BTreeMap::from([("team".to_string(), serde_json::json!("terminology"))]),
            &[],
        )
        .await
        .unwrap();

        let updated = update_branch_metadata(
            &store,
            "MAIN",
            BTreeMap::from([("lock".to_string(), serde_json::json!(true))]),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(
            updated.metadata.get("team"),
            Some(&serde_json::json!("terminology"))
        );
    }
}
