use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;

/// How much of an admission a lock covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    None,
    /// One holder per (operation, list, clock hour, email)
    Email,
    /// One holder per (operation, list)
    List,
}

/// Lock granularity of the two creation paths. Single creation defaults to
/// `email`; bulk defaults to `none`, i.e. concurrent bulk requests on the same
/// list may interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LockPolicy {
    pub single: LockScope,
    pub bulk: LockScope,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            single: LockScope::Email,
            bulk: LockScope::None,
        }
    }
}

/// Key for `scope`, or `None` when the scope takes no lock
pub fn lock_key(
    scope: LockScope,
    operation: &str,
    list_id: i64,
    email: &str,
    now: DateTime<Utc>,
) -> Option<String> {
    match scope {
        LockScope::None => None,
        LockScope::Email => Some(format!(
            "{operation}:{list_id}:{}:{email}",
            now.format("%Y%m%d%H")
        )),
        LockScope::List => Some(format!("{operation}:{list_id}")),
    }
}

/// In-process registry of held keys. Acquisition never waits: a busy key is
/// reported to the caller, who turns it into a 409.
///
/// This only serialises requests served by the same process.
#[derive(Clone, Default)]
pub struct NamedLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl NamedLocks {
    pub fn try_acquire(
        &self,
        key: String,
    ) -> Option<LockGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.insert(key.clone()) {
            true => Some(LockGuard {
                key,
                held: self.held.clone(),
            }),
            false => None,
        }
    }

    #[cfg(test)]
    fn is_held(
        &self,
        key: &str,
    ) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases its key when dropped, so every exit path of the holder (early
/// return, `?`, panic) gives the key back.
#[must_use]
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
