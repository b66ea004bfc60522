//! Sortable identifiers
//!
//! Ascending ids sort in creation order (messages, parts, calls). Descending
//! ids sort newest-first (sessions), so a plain directory listing of sessions
//! comes back in reverse-chronological order.
//!
//! Layout: `<prefix>_<12 hex timestamp ms><4 hex counter><12 hex random>`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

const TIMESTAMP_MASK: u64 = 0xFFFF_FFFF_FFFF;

static COUNTER: AtomicU16 = AtomicU16::new(0);
static LAST_TIMESTAMP: Mutex<u64> = Mutex::new(0);

/// Prefix of an identifier, naming the kind of record it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Session,
    Message,
    Part,
    Call,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Session => "session",
            IdPrefix::Message => "message",
            IdPrefix::Part => "part",
            IdPrefix::Call => "call",
        }
    }
}

/// Generate an ascending (forward-chronological) id
pub fn ascending(prefix: IdPrefix) -> String {
    let (timestamp, counter) = next_tick();
    format!(
        "{}_{:012x}{:04x}{}",
        prefix.as_str(),
        timestamp,
        counter,
        random_suffix()
    )
}

/// Generate a descending (reverse-chronological) id
pub fn descending(prefix: IdPrefix) -> String {
    let (timestamp, counter) = next_tick();
    format!(
        "{}_{:012x}{:04x}{}",
        prefix.as_str(),
        TIMESTAMP_MASK - timestamp,
        u16::MAX - counter,
        random_suffix()
    )
}

/// Extract the millisecond timestamp encoded in an id
pub fn timestamp_of(id: &str) -> Option<u64> {
    let (prefix, body) = id.split_once('_')?;
    let raw = u64::from_str_radix(body.get(..12)?, 16).ok()?;
    if prefix == IdPrefix::Session.as_str() {
        Some(TIMESTAMP_MASK - raw)
    } else {
        Some(raw)
    }
}

/// Current time plus a counter that makes ids generated within the same
/// millisecond strictly ordered.
fn next_tick() -> (u64, u16) {
    let now = (chrono::Utc::now().timestamp_millis().max(0) as u64) & TIMESTAMP_MASK;
    let mut last = match LAST_TIMESTAMP.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    // Never go backwards, even if the wall clock does.
    let timestamp = now.max(*last);
    let counter = if timestamp == *last {
        COUNTER.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    } else {
        COUNTER.store(0, Ordering::SeqCst);
        0
    };
    *last = timestamp;
    (timestamp, counter)
}

fn random_suffix() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    uuid[..12].to_string()
}
