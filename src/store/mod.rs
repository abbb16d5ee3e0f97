//! Session-scoped result storage shared by the in-memory backends.
//!
//! # Layout
//!
//! [`SessionStore`] maps `session_id -> (key -> ResultCell)` in a single
//! [`DashMap`]. Every operation that mutates a session (insert, pop, drain,
//! cancel) runs while holding that session's shard write guard; read-only
//! queries take the read guard. Each [`ResultCell`] additionally has its own
//! mutex so workers can transition results without touching the map. Lock
//! order is always session guard, then cell.
//!
//! # Expiry
//!
//! TTL is checked lazily when an entry is looked at. Lookups evict the
//! expired entry they find; nothing sweeps in the background.
//!
//! # Waiting
//!
//! Every insert and transition bumps a [`watch`] counter. `wait*` callers
//! subscribe, re-check their keys on each bump, and give up at their
//! deadline, so waiting never busy-loops.

pub(crate) mod cell;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::TaskResult;
use crate::error::{TaskError, TaskFailure};
use crate::types::status::TaskStatus;

pub(crate) use cell::ResultCell;
pub use cell::TaskHandle;

type SessionEntries = HashMap<String, Arc<ResultCell>>;

/// Upper bound used when a caller passes a timeout too large to add to
/// `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

#[derive(Debug)]
pub(crate) struct SessionStore {
    sessions: DashMap<String, SessionEntries>,
    changes: watch::Sender<u64>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            sessions: DashMap::new(),
            changes,
        }
    }

    /// Wakes every waiter so it re-checks its keys.
    pub(crate) fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Number of stored results across all sessions, expired ones included.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Stores `cell` under its `(session_id, key)`, replacing and returning
    /// any previous entry.
    pub(crate) fn insert(&self, cell: Arc<ResultCell>) -> Option<Arc<ResultCell>> {
        let (session_id, key) = {
            let result = cell.lock();
            (result.session_id().to_string(), result.key().to_string())
        };
        let previous = self
            .sessions
            .entry(session_id)
            .or_default()
            .insert(key, cell);
        self.notify();
        previous
    }

    /// Non-destructive snapshot; evicts the entry if it has expired.
    pub(crate) fn get(&self, session_id: &str, key: &str) -> Option<TaskResult> {
        let cell = self.sessions.get(session_id)?.get(key).cloned()?;
        let snapshot = cell.snapshot();
        if snapshot.is_expired() {
            self.evict(session_id, key, &cell);
            return None;
        }
        Some(snapshot)
    }

    /// Removes and returns the value of a `Completed` entry.
    ///
    /// `Cancelled` and expired entries are removed without a value. `Failed`
    /// entries stay in place for [`pop_errors`](Self::pop_errors); pending
    /// and running ones are untouched.
    pub(crate) fn pop(&self, session_id: &str, key: &str) -> Option<Value> {
        let value = {
            let mut entries = self.sessions.get_mut(session_id)?;
            let (value, remove) = {
                let cell = entries.get(key)?;
                let result = cell.lock();
                if result.is_expired() {
                    tracing::warn!(session_id, key, "evicting expired result");
                    (None, true)
                } else {
                    match result.status() {
                        TaskStatus::Completed => (result.value().cloned(), true),
                        TaskStatus::Cancelled => (None, true),
                        TaskStatus::Pending | TaskStatus::Running | TaskStatus::Failed => {
                            (None, false)
                        },
                    }
                }
            };
            if remove {
                entries.remove(key);
            }
            value
        };
        self.prune(session_id);
        value
    }

    /// Removes every `Completed` entry of the session and returns the values.
    pub(crate) fn pop_all(&self, session_id: &str) -> Vec<Value> {
        self.drain_where(session_id, |result| match result.status() {
            TaskStatus::Completed => result.value().cloned(),
            _ => None,
        })
        .into_iter()
        .map(|(_, value)| value)
        .collect()
    }

    /// Removes every `Failed` entry of the session and returns
    /// `(key, failure)` pairs.
    pub(crate) fn pop_errors(&self, session_id: &str) -> Vec<(String, TaskFailure)> {
        self.drain_where(session_id, |result| match result.status() {
            TaskStatus::Failed => result.error().cloned(),
            _ => None,
        })
    }

    /// `true` if a live `Completed` entry exists for `key`, or for any key
    /// of the session when `key` is `None`.
    pub(crate) fn has(&self, session_id: &str, key: Option<&str>) -> bool {
        let Some(entries) = self.sessions.get(session_id) else {
            return false;
        };
        let completed = |cell: &Arc<ResultCell>| {
            let result = cell.lock();
            result.status() == TaskStatus::Completed && !result.is_expired()
        };
        match key {
            Some(key) => entries.get(key).is_some_and(completed),
            None => entries.values().any(completed),
        }
    }

    /// Cancels a non-terminal entry. Returns `false` if the entry is missing
    /// or already finished.
    pub(crate) fn cancel(&self, session_id: &str, key: &str) -> bool {
        let cancelled = {
            let Some(entries) = self.sessions.get_mut(session_id) else {
                return false;
            };
            entries.get(key).is_some_and(|cell| cell.try_cancel())
        };
        if cancelled {
            tracing::debug!(session_id, key, "result cancelled");
            self.notify();
        }
        cancelled
    }

    /// Removes every entry of every session.
    pub(crate) fn clear(&self) -> Vec<Arc<ResultCell>> {
        let session_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut cells = Vec::new();
        for session_id in session_ids {
            if let Some((_, entries)) = self.sessions.remove(&session_id) {
                cells.extend(entries.into_values());
            }
        }
        self.notify();
        cells
    }

    /// Suspends until `key` is `Completed` (popping it), `Failed` or
    /// `Cancelled`, or `timeout` elapses.
    pub(crate) async fn wait(
        &self,
        session_id: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Value, TaskError> {
        self.wait_until(session_id, &[key], timeout, |store| {
            store.poll_one(session_id, key)
        })
        .await
    }

    /// Suspends until every key is `Completed`, then pops them together.
    pub(crate) async fn wait_all(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<HashMap<String, Value>, TaskError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.wait_until(session_id, keys, timeout, |store| {
            store.poll_all(session_id, keys)
        })
        .await
    }

    /// Suspends until any key is `Completed` and pops that one.
    pub(crate) async fn wait_any(
        &self,
        session_id: &str,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<(String, Value), TaskError> {
        if keys.is_empty() {
            tracing::error!(session_id, "wait_any called without keys");
            return Err(TaskError::EmptyKeys);
        }
        self.wait_until(session_id, keys, timeout, |store| {
            store.poll_any(session_id, keys)
        })
        .await
    }

    // ---- internals ----

    fn wait_until<'a, T, P>(
        &'a self,
        session_id: &'a str,
        keys: &'a [&'a str],
        timeout: Duration,
        mut poll: P,
    ) -> impl Future<Output = Result<T, TaskError>> + Send + 'a
    where
        T: Send + 'a,
        P: FnMut(&Self) -> Option<Result<T, TaskError>> + Send + 'a,
    {
        async move {
            let deadline = Instant::now()
                .checked_add(timeout)
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
            // Subscribing marks the current version as seen, so any change
            // after the first poll wakes the loop below.
            let mut changes = self.changes.subscribe();
            loop {
                if let Some(outcome) = poll(self) {
                    return outcome;
                }
                match tokio::time::timeout_at(deadline, changes.changed()).await {
                    Ok(Ok(())) => {},
                    Ok(Err(_)) | Err(_) => {
                        return Err(TaskError::Timeout {
                            session_id: session_id.to_string(),
                            keys: keys.iter().map(ToString::to_string).collect(),
                            timeout,
                        });
                    },
                }
            }
        }
    }

    fn poll_one(&self, session_id: &str, key: &str) -> Option<Result<Value, TaskError>> {
        let mut entries = self.sessions.get_mut(session_id)?;
        let outcome = {
            let result = entries.get(key)?.lock();
            if result.is_expired() {
                return None;
            }
            ready_outcome(&result)?
        };
        if outcome.is_ok() {
            entries.remove(key);
        }
        Some(outcome)
    }

    fn poll_all(
        &self,
        session_id: &str,
        keys: &[&str],
    ) -> Option<Result<HashMap<String, Value>, TaskError>> {
        let mut entries = self.sessions.get_mut(session_id)?;
        let mut values = HashMap::with_capacity(keys.len());
        let mut missing = false;
        for key in keys {
            let Some(cell) = entries.get(*key) else {
                missing = true;
                continue;
            };
            let result = cell.lock();
            if result.is_expired() {
                missing = true;
                continue;
            }
            match ready_outcome(&result) {
                Some(Ok(value)) => {
                    values.insert((*key).to_string(), value);
                },
                Some(Err(err)) => return Some(Err(err)),
                None => missing = true,
            }
        }
        if missing {
            return None;
        }
        for key in keys {
            entries.remove(*key);
        }
        Some(Ok(values))
    }

    fn poll_any(
        &self,
        session_id: &str,
        keys: &[&str],
    ) -> Option<Result<(String, Value), TaskError>> {
        let mut entries = self.sessions.get_mut(session_id)?;
        let mut first_failure = None;
        let mut all_failed = true;
        for key in keys {
            let outcome = entries.get(*key).and_then(|cell| {
                let result = cell.lock();
                if result.is_expired() {
                    None
                } else {
                    ready_outcome(&result)
                }
            });
            match outcome {
                Some(Ok(value)) => {
                    entries.remove(*key);
                    return Some(Ok(((*key).to_string(), value)));
                },
                Some(Err(err)) => {
                    first_failure.get_or_insert(err);
                },
                None => all_failed = false,
            }
        }
        if all_failed {
            return first_failure.map(Err);
        }
        None
    }

    /// Removes entries selected by `pick` (returning what it extracted) plus
    /// any expired entries it walks past.
    fn drain_where<T>(
        &self,
        session_id: &str,
        pick: impl Fn(&TaskResult) -> Option<T>,
    ) -> Vec<(String, T)> {
        let picked = {
            let Some(mut entries) = self.sessions.get_mut(session_id) else {
                return Vec::new();
            };
            let mut picked = Vec::new();
            let mut expired = HashSet::new();
            for (key, cell) in entries.iter() {
                let result = cell.lock();
                if result.is_expired() {
                    expired.insert(key.clone());
                } else if let Some(item) = pick(&result) {
                    picked.push((key.clone(), item));
                }
            }
            if !expired.is_empty() {
                tracing::warn!(session_id, count = expired.len(), "evicting expired results");
            }
            entries.retain(|key, _| {
                !expired.contains(key) && !picked.iter().any(|(picked_key, _)| picked_key == key)
            });
            picked
        };
        self.prune(session_id);
        picked
    }

    /// Evicts an expired `cell`; a newer entry under the same key is left
    /// alone.
    fn evict(&self, session_id: &str, key: &str, cell: &Arc<ResultCell>) {
        if self.remove(session_id, key, cell) {
            tracing::warn!(session_id, key, "evicting expired result");
        }
    }

    /// Removes `key` only if it still maps to `cell`. Returns `true` if the
    /// entry was removed.
    pub(crate) fn remove(&self, session_id: &str, key: &str, cell: &Arc<ResultCell>) -> bool {
        let removed = {
            let Some(mut entries) = self.sessions.get_mut(session_id) else {
                return false;
            };
            let current = entries.get(key).is_some_and(|current| Arc::ptr_eq(current, cell));
            if current {
                entries.remove(key);
            }
            current
        };
        self.prune(session_id);
        if removed {
            self.notify();
        }
        removed
    }

    fn prune(&self, session_id: &str) {
        self.sessions.remove_if(session_id, |_, entries| entries.is_empty());
    }
}

/// Terminal outcome of a result as seen by a waiter, or `None` while it is
/// still pending or running.
fn ready_outcome(result: &TaskResult) -> Option<Result<Value, TaskError>> {
    match result.status() {
        TaskStatus::Pending | TaskStatus::Running => None,
        TaskStatus::Completed => Some(Ok(result.value().cloned().unwrap_or(Value::Null))),
        TaskStatus::Failed => Some(Err(TaskError::Failed {
            key: result.key().to_string(),
            failure: result
                .error()
                .cloned()
                .unwrap_or_else(|| TaskFailure::msg("task failed without an error")),
        })),
        TaskStatus::Cancelled => Some(Err(TaskError::Cancelled {
            key: result.key().to_string(),
        })),
    }
}
