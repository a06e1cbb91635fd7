use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::{Arc, LazyLock},
};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::warn;

pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "webm", "opus"];
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const METADATA_DIR: &str = "metadata";
const TAGS_FILE: &str = "tags.json";

static BRACKETED: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[\[\]{}()][^\[\]{}()]*[\[\]{}()]").expect("bracket pattern"));
static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\S+").expect("hashtag pattern"));

#[derive(Error, Debug)]
pub enum LibraryError {
  #[error("sound library I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("unable to write metadata for {name}: {source}")]
  Metadata {
    name: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("sound not found: {0}")]
  NotFound(String),

  #[error("invalid file type, allowed: {}", ALLOWED_EXTENSIONS.join(", "))]
  UnsupportedExtension,

  #[error("file too large, maximum size is {}MB", MAX_UPLOAD_BYTES / (1024 * 1024))]
  TooLarge,

  #[error("invalid file name after sanitization")]
  InvalidName,

  #[error("Tag name is required")]
  EmptyTag,

  #[error("Tag already exists")]
  TagExists(String),

  #[error("tag not found: {0}")]
  TagNotFound(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundFile {
  pub name: String,
  pub display_name: String,
  #[serde(skip)]
  pub path: PathBuf,
  pub size: u64,
  pub uploaded_at: DateTime<Utc>,
  pub tags: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
  #[serde(default)]
  display_name: String,
  #[serde(default)]
  filename: String,
  #[serde(default)]
  tags: Vec<String>,
}

/// A partial edit of a clip's metadata. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
  pub display_name: Option<String>,
  pub tags: Option<Vec<String>>,
}

/// The shared sound library: a directory of audio clips plus an optional
/// `metadata/<name>_meta.json` per clip.
#[derive(Debug, Clone)]
pub struct SoundLibrary {
  root: Arc<PathBuf>,
}

impl SoundLibrary {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: Arc::new(root.into()),
    }
  }

  fn metadata_path(&self, name: &str) -> PathBuf {
    self.root.join(METADATA_DIR).join(format!("{name}_meta.json"))
  }

  fn tags_path(&self) -> PathBuf {
    self.root.join(METADATA_DIR).join(TAGS_FILE)
  }

  async fn read_metadata(&self, name: &str) -> Metadata {
    let path = self.metadata_path(name);
    let raw = match fs::read(&path).await {
      Ok(raw) => raw,
      Err(err) if err.kind() == ErrorKind::NotFound => return Metadata::default(),
      Err(err) => {
        warn!(path = %path.display(), error = %err, "unable to read sound metadata");
        return Metadata::default();
      }
    };
    serde_json::from_slice(&raw).unwrap_or_else(|err| {
      warn!(path = %path.display(), error = %err, "ignoring malformed sound metadata");
      Metadata::default()
    })
  }

  async fn write_metadata(&self, name: &str, metadata: &Metadata) -> Result<(), LibraryError> {
    write_json(&self.metadata_path(name), name, metadata).await
  }

  /// Tags created on their own, before any clip carries them.
  async fn read_tag_registry(&self) -> Vec<String> {
    let path = self.tags_path();
    match fs::read(&path).await {
      Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "ignoring malformed tag registry");
        Vec::new()
      }),
      Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
      Err(err) => {
        warn!(path = %path.display(), error = %err, "unable to read tag registry");
        Vec::new()
      }
    }
  }

  async fn write_tag_registry(&self, tags: &[String]) -> Result<(), LibraryError> {
    write_json(&self.tags_path(), TAGS_FILE, tags).await
  }

  /// Every playable clip, sorted by name. A missing directory is an empty library.
  pub async fn list(&self) -> Result<Vec<SoundFile>, LibraryError> {
    let mut entries = match fs::read_dir(self.root.as_path()).await {
      Ok(entries) => entries,
      Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(err) => return Err(err.into()),
    };

    let mut sounds = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      let Some(name) = playable_stem(&path) else {
        continue;
      };
      let stats = entry.metadata().await?;
      if !stats.is_file() {
        continue;
      }

      let metadata = self.read_metadata(&name).await;
      let display_name = if metadata.display_name.trim().is_empty() {
        default_display_name(&name)
      } else {
        metadata.display_name
      };
      sounds.push(SoundFile {
        display_name,
        path,
        size: stats.len(),
        uploaded_at: stats.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
        tags: metadata.tags,
        name,
      });
    }

    sounds.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sounds)
  }

  /// Looks a clip up by name, ignoring case.
  pub async fn get(&self, name: &str) -> Result<Option<SoundFile>, LibraryError> {
    Ok(
      self
        .list()
        .await?
        .into_iter()
        .find(|sound| sound.name.eq_ignore_ascii_case(name)),
    )
  }

  /// Stores an uploaded clip under a sanitized version of `file_name`,
  /// replacing any clip with the same name.
  pub async fn save(&self, file_name: &str, data: &[u8]) -> Result<SoundFile, LibraryError> {
    if data.len() > MAX_UPLOAD_BYTES {
      return Err(LibraryError::TooLarge);
    }
    let (stem, extension) = split_upload_name(file_name).ok_or(LibraryError::UnsupportedExtension)?;
    let name = sanitize_file_name(stem);
    if name.is_empty() || name == "_" {
      return Err(LibraryError::InvalidName);
    }

    fs::create_dir_all(self.root.as_path()).await?;
    fs::write(self.root.join(format!("{name}.{extension}")), data).await?;

    self
      .get(&name)
      .await?
      .ok_or(LibraryError::NotFound(name))
  }

  pub async fn delete(&self, name: &str) -> Result<(), LibraryError> {
    let sound = self
      .get(name)
      .await?
      .ok_or_else(|| LibraryError::NotFound(name.to_string()))?;
    fs::remove_file(&sound.path).await?;

    match fs::remove_file(self.metadata_path(&sound.name)).await {
      Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
      _ => Ok(()),
    }
  }

  /// Applies `update` to the clip's metadata file. A blank display name goes
  /// back to the one derived from the file name.
  pub async fn update_metadata(
    &self,
    name: &str,
    update: MetadataUpdate,
  ) -> Result<SoundFile, LibraryError> {
    let sound = self
      .get(name)
      .await?
      .ok_or_else(|| LibraryError::NotFound(name.to_string()))?;

    let mut metadata = self.read_metadata(&sound.name).await;
    if metadata.filename.is_empty() {
      metadata.filename = file_name_of(&sound.path);
    }
    if let Some(display_name) = update.display_name {
      metadata.display_name = display_name.trim().to_string();
    }
    if let Some(tags) = update.tags {
      metadata.tags = normalize_tags(tags);
    }
    self.write_metadata(&sound.name, &metadata).await?;

    let display_name = if metadata.display_name.is_empty() {
      default_display_name(&sound.name)
    } else {
      metadata.display_name
    };
    Ok(SoundFile {
      display_name,
      tags: metadata.tags,
      ..sound
    })
  }

  /// Every known tag: the registry plus whatever clips carry, sorted.
  pub async fn tags(&self) -> Result<Vec<String>, LibraryError> {
    let mut tags = self.read_tag_registry().await;
    tags.extend(self.list().await?.into_iter().flat_map(|sound| sound.tags));
    tags.sort();
    tags.dedup();
    Ok(tags)
  }

  pub async fn create_tag(&self, tag: &str) -> Result<String, LibraryError> {
    let tag = normalize_tag(tag).ok_or(LibraryError::EmptyTag)?;
    if self.tags().await?.contains(&tag) {
      return Err(LibraryError::TagExists(tag));
    }

    let mut registry = self.read_tag_registry().await;
    registry.push(tag.clone());
    registry.sort();
    self.write_tag_registry(&registry).await?;
    Ok(tag)
  }

  /// Removes `tag` from the registry and from every clip that carries it.
  pub async fn delete_tag(&self, tag: &str) -> Result<(), LibraryError> {
    let tag = normalize_tag(tag).ok_or_else(|| LibraryError::TagNotFound(tag.to_string()))?;
    if !self.tags().await?.contains(&tag) {
      return Err(LibraryError::TagNotFound(tag));
    }

    let mut registry = self.read_tag_registry().await;
    let before = registry.len();
    registry.retain(|known| *known != tag);
    if registry.len() != before {
      self.write_tag_registry(&registry).await?;
    }

    for sound in self.list().await? {
      if !sound.tags.contains(&tag) {
        continue;
      }
      let mut metadata = self.read_metadata(&sound.name).await;
      metadata.tags.retain(|known| *known != tag);
      self.write_metadata(&sound.name, &metadata).await?;
    }
    Ok(())
  }

  /// Rewrites the metadata file of every clip into the current layout: a
  /// sanitized `filename`, a cleaned-up `displayName` and a `tags` list.
  /// Returns the names of the clips it touched.
  pub async fn migrate_metadata(&self) -> Result<Vec<String>, LibraryError> {
    let mut migrated = Vec::new();
    for sound in self.list().await? {
      let mut metadata = self.read_metadata(&sound.name).await;
      let extension = sound
        .path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

      metadata.filename = format!(
        "{}.{extension}",
        sanitize_file_name(&normalize_display_name(&sound.name))
      );
      metadata.display_name = if metadata.display_name.trim().is_empty() {
        default_display_name(&sound.name)
      } else {
        default_display_name(&metadata.display_name)
      };
      metadata.tags = normalize_tags(metadata.tags);

      self.write_metadata(&sound.name, &metadata).await?;
      migrated.push(sound.name);
    }
    Ok(migrated)
  }
}

async fn write_json<V: Serialize + ?Sized>(path: &Path, name: &str, value: &V) -> Result<(), LibraryError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).await?;
  }
  let mut json = serde_json::to_string_pretty(value).map_err(|source| LibraryError::Metadata {
    name: name.to_string(),
    source,
  })?;
  json.push('\n');
  fs::write(path, json).await?;
  Ok(())
}

fn file_name_of(path: &Path) -> String {
  path
    .file_name()
    .map(|file| file.to_string_lossy().into_owned())
    .unwrap_or_default()
}

fn playable_stem(path: &Path) -> Option<String> {
  let extension = path.extension()?.to_str()?.to_ascii_lowercase();
  if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
    return None;
  }
  Some(path.file_stem()?.to_str()?.to_string())
}

fn default_display_name(name: &str) -> String {
  let normalized = normalize_display_name(&name.replace('_', " "));
  if normalized.is_empty() {
    name.to_string()
  } else {
    normalized
  }
}

fn split_upload_name(file_name: &str) -> Option<(&str, String)> {
  let (stem, extension) = file_name.rsplit_once('.')?;
  let extension = extension.to_ascii_lowercase();
  ALLOWED_EXTENSIONS
    .contains(&extension.as_str())
    .then_some((stem, extension))
}

fn normalize_tag(tag: &str) -> Option<String> {
  let tag = tag.trim().to_lowercase();
  (!tag.is_empty()).then_some(tag)
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
  let mut tags: Vec<String> = tags.iter().filter_map(|tag| normalize_tag(tag)).collect();
  tags.sort();
  tags.dedup();
  tags
}

pub fn is_allowed_extension(file_name: &str) -> bool {
  split_upload_name(file_name).is_some()
}

/// Lowercases and replaces everything outside `[a-z0-9_-]` with a single `_`.
pub fn sanitize_file_name(file_name: &str) -> String {
  let mut sanitized = String::with_capacity(file_name.len());
  for c in file_name.chars() {
    let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
      c.to_ascii_lowercase()
    } else {
      '_'
    };
    if c == '_' && sanitized.ends_with('_') {
      continue;
    }
    sanitized.push(c);
  }
  sanitized
}

/// Turns a raw upload name into something fit for display: bracketed notes,
/// hashtags, emoji and other symbols are dropped.
pub fn normalize_display_name(file_name: &str) -> String {
  let without_brackets = BRACKETED.replace_all(file_name, "");
  let without_hashtags = HASHTAG.replace_all(&without_brackets, "");
  let kept: String = without_hashtags
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
    .collect();
  kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn format_file_size(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = 1024 * 1024;
  if bytes < KB {
    format!("{bytes} B")
  } else if bytes < MB {
    format!("{:.2} KB", bytes as f64 / KB as f64)
  } else {
    format!("{:.2} MB", bytes as f64 / MB as f64)
  }
}
