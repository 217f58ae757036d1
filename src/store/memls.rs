//! Simple in-memory lock table.
//!
//! Both reference storages keep their locks here. Locks cover the locked
//! resource and everything below it, and expire after a timeout unless
//! they are refreshed.
use std::time::{Duration, SystemTime};

use http::StatusCode;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::store::{LockScope, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct LockEntry {
    rel: String,
    token: String,
    scope: LockScope,
    // `Depth: infinity`; a depth-0 lock covers only its own resource.
    deep: bool,
    expires: Option<SystemTime>,
}

/// Is `rel` the resource `root`, or below it.
pub(crate) fn covers(root: &str, rel: &str) -> bool {
    root.is_empty() || root == rel || (rel.starts_with(root) && rel[root.len()..].starts_with('/'))
}

impl LockEntry {
    fn covers(&self, rel: &str) -> bool {
        if self.deep {
            covers(&self.rel, rel)
        } else {
            self.rel == rel
        }
    }
}

/// Ephemeral lock table.
#[derive(Debug)]
pub struct MemLs {
    locks: Mutex<Vec<LockEntry>>,
    timeout: Option<Duration>,
}

impl MemLs {
    /// Create a new lock table. Locks expire `timeout` after they were
    /// taken or last refreshed; `None` keeps them until unlocked.
    pub fn new(timeout: Option<Duration>) -> MemLs {
        MemLs {
            locks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    fn expiry(&self) -> Option<SystemTime> {
        self.timeout.map(|t| SystemTime::now() + t)
    }

    fn prune(locks: &mut Vec<LockEntry>) {
        let now = SystemTime::now();
        locks.retain(|l| match l.expires {
            Some(t) if t <= now => {
                debug!("lock {} on /{} expired", l.token, l.rel);
                false
            }
            _ => true,
        });
    }

    /// Take a new lock, or refresh the lock `token` already holds.
    ///
    /// `deep` locks cover everything below `path` as well. The conflict
    /// test and the insert happen under one mutex, so two racing exclusive
    /// lock requests cannot both succeed.
    pub fn lock(
        &self,
        path: &DavPath,
        token: &str,
        scope: LockScope,
        deep: bool,
    ) -> StoreResult<()> {
        let mut locks = self.locks.lock();
        Self::prune(&mut locks);
        let expires = self.expiry();

        if let Some(l) = locks.iter_mut().find(|l| l.token == token) {
            if !l.covers(path.as_rel_str()) {
                return Err(StoreError::Status(
                    StatusCode::PRECONDITION_FAILED,
                    "Lock token does not match the resource".to_string(),
                ));
            }
            l.expires = expires;
            return Ok(());
        }

        let rel = path.as_rel_str();
        // a lock conflicts with locks above it and with locks below it.
        let conflict = locks
            .iter()
            .filter(|l| l.covers(rel) || l.rel == rel || (deep && covers(rel, &l.rel)))
            .any(|l| l.scope == LockScope::Exclusive || scope == LockScope::Exclusive);
        if conflict {
            return Err(StoreError::Locked);
        }

        locks.push(LockEntry {
            rel: rel.to_string(),
            token: token.to_string(),
            scope,
            deep,
            expires,
        });
        Ok(())
    }

    /// Remove the lock `token` holds on `path` or on one of its parents.
    pub fn unlock(&self, path: &DavPath, token: &str) -> StoreResult<()> {
        let mut locks = self.locks.lock();
        Self::prune(&mut locks);
        let rel = path.as_rel_str();
        match locks.iter().position(|l| l.token == token && l.covers(rel)) {
            Some(idx) => {
                locks.remove(idx);
                Ok(())
            }
            None => Err(StoreError::Status(
                StatusCode::CONFLICT,
                "No such lock".to_string(),
            )),
        }
    }

    /// See [`DavStorage::get_lock`](crate::store::DavStorage::get_lock).
    pub fn get_lock(&self, path: &DavPath, token: Option<&str>) -> Option<LockScope> {
        let mut locks = self.locks.lock();
        Self::prune(&mut locks);
        let rel = path.as_rel_str();
        let mut covering = locks.iter().filter(|l| l.covers(rel));
        match token {
            Some(token) => covering.find(|l| l.token == token).map(|l| l.scope),
            None => {
                let mut found = None;
                for l in covering {
                    if l.scope == LockScope::Exclusive {
                        return Some(LockScope::Exclusive);
                    }
                    found = Some(l.scope);
                }
                found
            }
        }
    }

    /// Is anything strictly below `path` locked by someone not holding `token`.
    pub fn locked_below(&self, path: &DavPath, token: Option<&str>) -> bool {
        let mut locks = self.locks.lock();
        Self::prune(&mut locks);
        let rel = path.as_rel_str();
        locks
            .iter()
            .filter(|l| l.rel != rel && covers(rel, &l.rel))
            .any(|l| Some(l.token.as_str()) != token)
    }

    /// Drop all locks on `path` and below, after it was deleted or moved.
    pub fn remove_below(&self, path: &DavPath) {
        let root = path.as_rel_str();
        self.locks.lock().retain(|l| !covers(root, &l.rel));
    }
}
