//! Session file persistence
//!
//! The session lives in a JSON file shaped like
//! `{"version": 1, "providers": {"foodora": {..}}}`. Older releases wrote the
//! foodora record at the top level; such files are migrated on load and
//! rewritten in the current shape on the next save. All writes use atomic
//! temp-file + rename with 0600 permissions since the file holds tokens and
//! the client secret.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::{SessionRecord, SessionState};

const FILE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    providers: Providers,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Providers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    foodora: Option<SessionRecord>,
}

/// Loads and saves the session record at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the session. A missing file yields an empty record; a record
    /// without a device id gets a fresh one and comes back dirty so the id is
    /// persisted.
    pub async fn load(&self) -> Result<SessionState> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "session file not found, starting empty");
                return Ok(with_device_id(SessionRecord::default(), false));
            }
            Err(e) => return Err(Error::Io(format!("reading session file: {e}"))),
        };

        let (record, migrated) = parse_session_file(&contents)?;
        if migrated {
            info!(path = %self.path.display(), "migrating legacy session file");
        }
        debug!(path = %self.path.display(), has_session = record.has_session(), "loaded session");
        Ok(with_device_id(record, migrated))
    }

    /// Persist the record and mark the state clean.
    pub async fn save(&self, state: &mut SessionState) -> Result<()> {
        let file = SessionFile {
            version: FILE_VERSION,
            providers: Providers {
                foodora: Some(state.record().clone()),
            },
        };
        write_atomic(&self.path, &file).await?;
        state.mark_clean();
        Ok(())
    }

    /// Save only when the state changed.
    pub async fn save_if_dirty(&self, state: &mut SessionState) -> Result<bool> {
        if !state.is_dirty() {
            return Ok(false);
        }
        self.save(state).await?;
        Ok(true)
    }
}

/// Returns the record and whether it came from the legacy flat layout.
fn parse_session_file(contents: &str) -> Result<(SessionRecord, bool)> {
    let value: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;

    let has_providers = value
        .get("providers")
        .is_some_and(|p| !p.is_null());

    if has_providers {
        let file: SessionFile = serde_json::from_value(value)
            .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
        Ok((file.providers.foodora.unwrap_or_default(), false))
    } else {
        let record: SessionRecord = serde_json::from_value(value)
            .map_err(|e| Error::CredentialParse(format!("parsing legacy session file: {e}")))?;
        Ok((record, true))
    }
}

fn with_device_id(mut record: SessionRecord, dirty: bool) -> SessionState {
    let missing = record.device_id.trim().is_empty();
    if missing {
        record.device_id = uuid::Uuid::new_v4().to_string();
    }
    let mut state = SessionState::new(record);
    if missing || dirty {
        // Route through edit() so the new id (or migrated layout) gets saved.
        let _ = state.edit();
    }
    state
}

async fn write_atomic(path: &Path, file: &SessionFile) -> Result<()> {
    let mut json = serde_json::to_string_pretty(file)
        .map_err(|e| Error::CredentialParse(format!("serializing session: {e}")))?;
    json.push('\n');

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::Io(format!("creating session directory: {e}")))?;

    // The temp file is created 0600 and removed again if anything below fails.
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".session.tmp.")
            .tempfile_in(&dir)
            .map_err(|e| Error::Io(format!("creating temp session file: {e}")))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;
        tmp.persist(&target)
            .map_err(|e| Error::Io(format!("renaming temp session file: {}", e.error)))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Io(format!("session writer task failed: {e}")))??;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
