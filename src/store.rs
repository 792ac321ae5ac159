use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Millis;
use crate::error::{ChatError, Result};
use crate::rate_limit::RateLimitState;

pub const COUNTER_FILE: &str = "rate_limit.json";

/// Durable home of the governor's counters.
///
/// `load` returns `Ok(None)` both when nothing was stored and when what was
/// stored cannot be read back; callers restart the window in either case.
pub trait CounterStore: Send {
    fn load(&self) -> Result<Option<RateLimitState>>;
    fn save(&mut self, state: &RateLimitState) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

// On-disk layout: every value is a string, absent keys mean unset
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCounters {
    #[serde(rename = "requestCount", default, skip_serializing_if = "Option::is_none")]
    request_count: Option<String>,
    #[serde(
        rename = "firstRequestTime",
        alias = "windowStart",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    window_start: Option<String>,
    #[serde(rename = "blockUntil", default, skip_serializing_if = "Option::is_none")]
    block_until: Option<String>,
}

impl StoredCounters {
    fn from_state(state: &RateLimitState) -> Self {
        Self {
            request_count: Some(state.request_count.to_string()),
            window_start: state.window_start.map(|t| t.to_string()),
            block_until: state.blocked_until.map(|t| t.to_string()),
        }
    }

    fn into_state(self) -> std::result::Result<RateLimitState, String> {
        let request_count = match self.request_count {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|e| format!("requestCount {:?}: {}", raw, e))?,
            None => 0,
        };
        Ok(RateLimitState {
            request_count,
            window_start: parse_timestamp("firstRequestTime", self.window_start)?,
            blocked_until: parse_timestamp("blockUntil", self.block_until)?,
        })
    }
}

fn parse_timestamp(
    key: &str,
    raw: Option<String>,
) -> std::result::Result<Option<Millis>, String> {
    raw.map(|raw| {
        raw.trim()
            .parse::<Millis>()
            .map_err(|e| format!("{} {:?}: {}", key, raw, e))
    })
    .transpose()
}

pub struct FileCounterStore {
    path: PathBuf,
}

impl FileCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(COUNTER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CounterStore for FileCounterStore {
    fn load(&self) -> Result<Option<RateLimitState>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChatError::io(&self.path, e)),
        };

        let decoded = serde_json::from_str::<StoredCounters>(&raw)
            .map_err(|e| e.to_string())
            .and_then(StoredCounters::into_state);

        match decoded {
            Ok(state) => Ok(Some(state)),
            Err(reason) => {
                warn!(
                    "Ignoring corrupt rate limit state in {}: {}",
                    self.path.display(),
                    reason
                );
                Ok(None)
            }
        }
    }

    fn save(&mut self, state: &RateLimitState) -> Result<()> {
        if state.is_empty() {
            return self.clear();
        }
        write_json_atomic(&self.path, &StoredCounters::from_state(state))?;
        debug!("Saved rate limit state to {}", self.path.display());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::io(&self.path, e)),
        }
    }
}

/// Serialize to a sibling temp file and rename over the target.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ChatError::io(parent, e))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| ChatError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ChatError::io(path, e))
}

/// Process-local store; clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    slot: Arc<Mutex<Option<RateLimitState>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RateLimitState) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(state))),
        }
    }

    pub fn snapshot(&self) -> Option<RateLimitState> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CounterStore for MemoryCounterStore {
    fn load(&self) -> Result<Option<RateLimitState>> {
        Ok(self.snapshot())
    }

    fn save(&mut self, state: &RateLimitState) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = if state.is_empty() { None } else { Some(*state) };
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
