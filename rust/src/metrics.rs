//! Per-process counters of which backend served each operation.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

pub const STATUS_OK: &str = "ok";
pub const STATUS_FAILED: &str = "failed";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendUsage {
    pub operation: &'static str,
    pub backend: &'static str,
    pub status: &'static str,
    pub count: u64,
}

type UsageKey = (&'static str, &'static str, &'static str);

fn usage_map() -> &'static Mutex<HashMap<UsageKey, u64>> {
    static COUNTS: OnceLock<Mutex<HashMap<UsageKey, u64>>> = OnceLock::new();
    COUNTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn record(operation: &'static str, backend: &'static str, status: &'static str) {
    if operation.is_empty() || backend.is_empty() {
        return;
    }
    if let Ok(mut guard) = usage_map().lock() {
        let entry = guard.entry((operation, backend, status)).or_insert(0);
        *entry = entry.saturating_add(1);
    }
}

/// A backend completed `operation`.
pub fn record_backend(operation: &'static str, backend: &'static str) {
    record(operation, backend, STATUS_OK);
}

/// A backend failed `operation` and the call fell back.
pub fn record_fallback(operation: &'static str, backend: &'static str) {
    record(operation, backend, STATUS_FAILED);
}

pub fn count(operation: &str, backend: &str, status: &str) -> u64 {
    usage_map()
        .lock()
        .ok()
        .and_then(|guard| {
            guard
                .iter()
                .find(|(&(op, name, st), _)| op == operation && name == backend && st == status)
                .map(|(_, &count)| count)
        })
        .unwrap_or(0)
}

pub fn snapshot() -> Vec<BackendUsage> {
    let mut usage: Vec<BackendUsage> = usage_map()
        .lock()
        .map(|guard| {
            guard
                .iter()
                .map(|(&(operation, backend, status), &count)| BackendUsage {
                    operation,
                    backend,
                    status,
                    count,
                })
                .collect()
        })
        .unwrap_or_default();
    usage.sort_by_key(|entry| (entry.operation, entry.backend, entry.status));
    usage
}
