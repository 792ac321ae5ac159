use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{ChatError, Result};
use crate::models::{Message, Role};
use crate::store::write_json_atomic;

pub const HISTORY_FILE: &str = "history.json";

/// Where the transcript lives between runs.
pub trait HistoryStore: Send {
    fn load(&self) -> Result<Vec<Message>>;
    fn save(&mut self, messages: &[Message]) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

// in-flight placeholders are never restored
fn restorable(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| m.role != Role::Pending)
        .collect()
}

pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for FileHistoryStore {
    fn load(&self) -> Result<Vec<Message>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ChatError::io(&self.path, e)),
        };
        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => Ok(restorable(messages)),
            Err(e) => {
                warn!("Failed to parse saved messages in {}: {}", self.path.display(), e);
                Ok(Vec::new())
            }
        }
    }

    fn save(&mut self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        write_json_atomic(&self.path, &messages)
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(ChatError::io(&self.path, e)),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self) -> Result<Vec<Message>> {
        Ok(restorable(self.snapshot()))
    }

    fn save(&mut self, messages: &[Message]) -> Result<()> {
        if !messages.is_empty() {
            *self.messages.lock().unwrap_or_else(|e| e.into_inner()) = messages.to_vec();
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}
