//! Export directory discovery.
//!
//! Full export: every immediate subdirectory of the root is a channel.
//! Partial export: the selected directory is the only channel and its parent
//! is searched for the shared `users.json` / `channels.json`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{domain::ExportMode, errors::Error, Result};

pub const USERS_FILE: &str = "users.json";
pub const CHANNELS_FILE: &str = "channels.json";

/// One channel directory and its per-day message files in lexical order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDir {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// A channel directory that could not be listed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnreadableChannel {
    pub name: String,
    pub reason: String,
}

/// Result of scanning an export.
#[derive(Clone, Debug)]
pub struct ExportLayout {
    /// Directory searched for shared metadata (`None` for a standalone partial export at `/`).
    pub metadata_root: Option<PathBuf>,
    pub mode: ExportMode,
    pub channels: Vec<ChannelDir>,
    pub unreadable: Vec<UnreadableChannel>,
    pub users_file: Option<PathBuf>,
    pub channels_file: Option<PathBuf>,
}

impl ExportLayout {
    /// Total message files across channels. Advisory: drives progress only.
    pub fn total_files(&self) -> usize {
        self.channels.iter().map(|c| c.files.len()).sum()
    }
}

#[derive(Clone, Debug)]
pub struct ExportScanner {
    users_file_name: String,
    channels_file_name: String,
}

impl Default for ExportScanner {
    fn default() -> Self {
        Self::new(USERS_FILE, CHANNELS_FILE)
    }
}

impl ExportScanner {
    pub fn new(users_file_name: impl Into<String>, channels_file_name: impl Into<String>) -> Self {
        Self {
            users_file_name: users_file_name.into(),
            channels_file_name: channels_file_name.into(),
        }
    }

    /// Discover channel directories and metadata files.
    ///
    /// Fails only when the selected path itself is missing or unreadable
    /// (in partial mode that includes listing the channel itself); channel
    /// directories of a full export that cannot be listed are reported in
    /// [`ExportLayout::unreadable`].
    pub async fn discover(&self, path: &Path, mode: ExportMode) -> Result<ExportLayout> {
        // `.`/`..` have no file name or a useless parent until resolved.
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| invalid_path(path, e.to_string()))?;
        let path = resolved.as_path();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| invalid_path(path, e.to_string()))?;
        if !meta.is_dir() {
            return Err(invalid_path(path, "not a directory".to_string()));
        }

        let (metadata_root, channel_paths) = match mode {
            ExportMode::Full => (
                Some(path.to_path_buf()),
                list_subdirectories(path)
                    .await
                    .map_err(|e| invalid_path(path, e.to_string()))?,
            ),
            ExportMode::Partial => (
                path.parent().map(Path::to_path_buf),
                vec![path.to_path_buf()],
            ),
        };

        let mut channels = Vec::with_capacity(channel_paths.len());
        let mut unreadable = Vec::new();
        for dir in channel_paths {
            let name = dir_name(&dir);
            match list_json_files(&dir).await {
                Ok(files) => channels.push(ChannelDir {
                    name,
                    path: dir,
                    files,
                }),
                Err(e) if mode == ExportMode::Partial => {
                    return Err(invalid_path(path, e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(channel = %name, error = %e, "channel directory unreadable");
                    unreadable.push(UnreadableChannel {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let (users_file, channels_file) = match &metadata_root {
            Some(root) => (
                existing_file(&root.join(&self.users_file_name)).await,
                existing_file(&root.join(&self.channels_file_name)).await,
            ),
            None => (None, None),
        };

        tracing::debug!(
            mode = %mode,
            channels = channels.len(),
            users = users_file.is_some(),
            metadata = channels_file.is_some(),
            "export scanned"
        );

        Ok(ExportLayout {
            metadata_root,
            mode,
            channels,
            unreadable,
            users_file,
            channels_file,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawChannelMeta {
    name: Option<String>,
    #[serde(default)]
    purpose: Option<RawTextField>,
    #[serde(default)]
    topic: Option<RawTextField>,
}

#[derive(Debug, Deserialize)]
struct RawTextField {
    #[serde(default)]
    value: Option<String>,
}

/// Parse `channels.json` into `name -> description`.
///
/// The description is `purpose.value`, or `topic.value` when the purpose is empty.
pub fn parse_channel_descriptions(json: &str) -> Result<HashMap<String, String>> {
    let raw: Vec<RawChannelMeta> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .filter_map(|c| {
            let name = c.name?;
            let text = |f: Option<RawTextField>| {
                f.and_then(|f| f.value)
                    .filter(|v| !v.trim().is_empty())
            };
            let description = text(c.purpose).or_else(|| text(c.topic)).unwrap_or_default();
            Some((name, description))
        })
        .collect())
}

pub async fn load_channel_descriptions(path: &Path) -> Result<HashMap<String, String>> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse_channel_descriptions(&contents)
        .map_err(|e| Error::parse(Some(path.to_path_buf()), e.to_string()))
}

async fn list_subdirectories(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// `*.json` files in lexical (for Slack's `YYYY-MM-DD.json` names, chronological) order.
///
/// Symlinks are followed, so a dangling one fails the listing.
async fn list_json_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json && tokio::fs::metadata(&path).await?.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

async fn existing_file(path: &Path) -> Option<PathBuf> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Some(path.to_path_buf()),
        _ => None,
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn invalid_path(path: &Path, reason: String) -> Error {
    Error::InvalidPath {
        path: path.to_path_buf(),
        reason,
    }
}
