/*!
 * Subtitle artifacts on disk.
 *
 * Every job has two files under the artifact root: the final translated
 * document and a placeholder that shows progress while the job runs. Media
 * players poll the placeholder, so it is rewritten after every batch.
 */

use anyhow::{Context, Result};
use log::{debug, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::language_utils::normalize_to_part1_or_part2t;
use crate::subtitle_processor::{SubtitleCollection, SubtitleEntry};

use super::models::JobKey;

const PLACEHOLDER_SUFFIX: &str = "-placeholder";

// @const: The placeholder covers the first ten minutes of playback
const PLACEHOLDER_START_MS: u64 = 1_000;
const PLACEHOLDER_END_MS: u64 = 650_000;

/// Single-entry document that carries a status message
pub fn placeholder_document(message: &str) -> SubtitleCollection {
    let entry = SubtitleEntry::from_text(1, PLACEHOLDER_START_MS, PLACEHOLDER_END_MS, message);
    let mut document = SubtitleCollection::from_entries(vec![entry], "");
    document.encoding.has_bom = true;
    document
}

/// File store for final and placeholder subtitles
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `data_dir/subtitles`
    pub fn in_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join("subtitles"))
    }

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // {root}/{lang}/{id}[/season{S}]
    fn job_dir(&self, key: &JobKey) -> PathBuf {
        let language = normalize_to_part1_or_part2t(&key.target_language)
            .unwrap_or_else(|_| sanitize(&key.target_language.to_lowercase()));
        let mut dir = self.root.join(language).join(sanitize(&key.content_id));
        if let (Some(season), Some(_)) = (key.season, key.episode) {
            dir = dir.join(format!("season{}", season));
        }
        dir
    }

    fn file_name(key: &JobKey, suffix: &str) -> String {
        let id = sanitize(&key.content_id);
        match (key.season, key.episode) {
            (Some(_), Some(episode)) => format!("{}-translated-{}-1{}.srt", id, episode, suffix),
            _ => format!("{}-translated-1{}.srt", id, suffix),
        }
    }

    pub fn final_path(&self, key: &JobKey) -> PathBuf {
        self.job_dir(key).join(Self::file_name(key, ""))
    }

    pub fn placeholder_path(&self, key: &JobKey) -> PathBuf {
        self.job_dir(key).join(Self::file_name(key, PLACEHOLDER_SUFFIX))
    }

    /// Path of the final document shifted to start at `offset_secs`
    pub fn offset_path(&self, key: &JobKey, offset_secs: u64) -> PathBuf {
        self.job_dir(key).join(Self::file_name(key, &format!("-offset-{}", offset_secs)))
    }

    /// Write the translated document, always with a UTF-8 BOM
    pub fn write_final(&self, key: &JobKey, document: &SubtitleCollection) -> Result<PathBuf> {
        let mut document = document.clone();
        document.encoding.has_bom = true;
        let path = self.final_path(key);
        write_atomic(&path, document.to_srt_string().as_bytes())?;
        debug!("Wrote translated subtitles to {}", path.display());
        Ok(path)
    }

    pub fn write_placeholder(&self, key: &JobKey, message: &str) -> Result<()> {
        let document = placeholder_document(message);
        write_atomic(&self.placeholder_path(key), document.to_srt_string().as_bytes())
    }

    /// Write a time-shifted copy of the final document
    pub fn write_offset(&self, key: &JobKey, offset_secs: u64, document: &SubtitleCollection) -> Result<PathBuf> {
        let mut document = document.clone();
        document.encoding.has_bom = true;
        let path = self.offset_path(key, offset_secs);
        write_atomic(&path, document.to_srt_string().as_bytes())?;
        debug!("Wrote subtitles shifted by {}s to {}", offset_secs, path.display());
        Ok(path)
    }

    pub fn read_offset(&self, key: &JobKey, offset_secs: u64) -> Result<Option<String>> {
        read_optional(&self.offset_path(key, offset_secs))
    }

    pub fn read_final(&self, key: &JobKey) -> Result<Option<String>> {
        read_optional(&self.final_path(key))
    }

    pub fn read_placeholder(&self, key: &JobKey) -> Result<Option<String>> {
        read_optional(&self.placeholder_path(key))
    }

    pub fn has_final(&self, key: &JobKey) -> bool {
        self.final_path(key).is_file()
    }

    pub fn remove_placeholder(&self, key: &JobKey) -> Result<()> {
        let path = self.placeholder_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove placeholder: {}", path.display())),
        }
    }

    /// Remove every time-shifted copy of the final document
    pub fn remove_offsets(&self, key: &JobKey) -> Result<usize> {
        let dir = self.job_dir(key);
        let prefix = Self::file_name(key, "-offset-").trim_end_matches(".srt").to_string();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let is_offset = entry.file_name().to_str().is_some_and(|name| name.starts_with(&prefix));
            if is_offset && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Time since the placeholder was last rewritten
    pub fn placeholder_age(&self, key: &JobKey) -> Option<Duration> {
        file_age(&self.placeholder_path(key))
    }

    /// Delete placeholders nobody has rewritten within `max_age`
    pub fn cleanup_stale_placeholders(&self, max_age: Duration) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_placeholder = entry.file_type().is_file()
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.ends_with(PLACEHOLDER_SUFFIX));
            if !is_placeholder {
                continue;
            }
            if file_age(path).is_some_and(|age| age > max_age) {
                match std::fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale placeholder {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            debug!("Removed {} stale placeholder(s)", removed);
        }
        Ok(removed)
    }
}

// Content ids come from request paths; keep them to one path component
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("Artifact path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifact directory: {}", dir.display()))?;

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(path)
        .with_context(|| format!("Failed to persist artifact: {}", path.display()))?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read artifact: {}", path.display())),
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}
