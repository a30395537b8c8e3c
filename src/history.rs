use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write history file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub bot: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub conversations: Vec<Exchange>,
}

/// Flat-file JSON store for per-session conversation history.
///
/// The whole file is read and rewritten on every append; a single advisory
/// lock serializes access within this process.
#[derive(Clone)]
pub struct ChatHistory {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ChatHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The exchanges recorded for a session, oldest first. Unknown sessions
    /// read as empty.
    pub async fn session(&self, session_id: &str) -> Result<Vec<Exchange>, HistoryError> {
        let _guard = self.lock.lock().await;
        let data = self.load().await?;
        Ok(data
            .get(session_id)
            .map(|session| session.conversations.clone())
            .unwrap_or_default())
    }

    pub async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        user: &str,
        bot: &str,
    ) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;

        let session = data
            .entry(session_id.to_string())
            .or_insert_with(|| SessionHistory {
                user_id: user_id.to_string(),
                conversations: Vec::new(),
            });
        session.conversations.push(Exchange {
            user: user.to_string(),
            bot: bot.to_string(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        });

        debug!(
            session_id = session_id,
            exchanges = session.conversations.len(),
            "Appending exchange to history"
        );
        self.save(&data).await
    }

    async fn load(&self) -> Result<HashMap<String, SessionHistory>, HistoryError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(HistoryError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "History file is unreadable, starting fresh"
                );
                Ok(HashMap::new())
            }
        }
    }

    async fn save(&self, data: &HashMap<String, SessionHistory>) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| HistoryError::Write {
                    path: self.path.clone(),
                    source: e,
                })?;
            }
        }

        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, json).await.map_err(|e| HistoryError::Write {
            path: self.path.clone(),
            source: e,
        })
    }
}
