use crate::conversation::Message;
use log::{debug, warn};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid conversation id: {0:?}")]
    InvalidId(String),
    #[error("failed to create {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize conversation {id}: {source}")]
    Serialize {
        id: String,
        source: serde_json::Error,
    },
}

/// One `<id>.json` file per conversation under a single directory.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        Ok(self.dir.clone())
    }

    fn conversation_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == OsStr::new(id) => {
                Ok(self.dir.join(format!("{id}.json")))
            }
            _ => Err(StoreError::InvalidId(id.to_string())),
        }
    }

    /// Ids of every stored conversation, newest first. An unreadable
    /// directory yields an empty list.
    pub fn list_conversations(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "failed to read conversations directory {}: {err}",
                    self.dir.display()
                );
                return Vec::new();
            }
        };

        let mut found: Vec<(SystemTime, String)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension() != Some(OsStr::new("json")) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(OsStr::to_str) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, id.to_string()));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        debug!("listed {} conversations in {}", found.len(), self.dir.display());
        found.into_iter().map(|(_, id)| id).collect()
    }

    pub fn try_load(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        let path = self.conversation_path(id)?;
        let data = fs::read(&path).map_err(|source| StoreError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| StoreError::Parse { path, source })
    }

    /// Best-effort load: a missing or malformed file yields no messages.
    pub fn load(&self, id: &str) -> Vec<Message> {
        match self.try_load(id) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("conversation {id} could not be loaded: {err}");
                Vec::new()
            }
        }
    }

    pub fn save(&self, id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let final_path = self.conversation_path(id)?;
        let dir = self.ensure_dir()?;
        let tmp_path = dir.join(format!("{id}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(messages).map_err(|source| StoreError::Serialize {
            id: id.to_string(),
            source,
        })?;

        fs::write(&tmp_path, bytes)
            .and_then(|()| replace_file(&tmp_path, &final_path))
            .map_err(|source| {
                let _ = fs::remove_file(&tmp_path);
                StoreError::Write {
                    path: final_path.clone(),
                    source,
                }
            })
    }
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if to.exists() {
                fs::remove_file(to)?;
                fs::rename(from, to)
            } else {
                Err(rename_err)
            }
        }
    }
}
