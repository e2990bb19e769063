use std::collections::HashSet;
use std::fmt;
use regex::Regex;
use once_cell::sync::Lazy;
use anyhow::{Result, Context, anyhow};
use log::{warn, debug};
use serde::{Deserialize, Serialize};

use crate::errors::SubtitleError;

// @module: SRT codec and the in-memory subtitle document

// @const: SRT timing line, comma or dot before the milliseconds
static TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,3}):(\d{2}):(\d{2})[,.](\d{3})").unwrap()
});

// @const: Byte order mark some providers prepend to SRT files
const UTF8_BOM: char = '\u{feff}';

// @struct: Single subtitle entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    // @field: Sequence number
    pub seq_num: usize,

    // @field: Start time in ms
    pub start_time_ms: u64,

    // @field: End time in ms
    pub end_time_ms: u64,

    // @field: Text lines, formatting markers kept verbatim
    pub lines: Vec<String>,
}

impl SubtitleEntry {
    /// Creates a new subtitle entry from already split lines
    pub fn new(seq_num: usize, start_time_ms: u64, end_time_ms: u64, lines: Vec<String>) -> Self {
        SubtitleEntry {
            seq_num,
            start_time_ms,
            end_time_ms,
            lines,
        }
    }

    // @creates: Entry whose text is split on newlines
    pub fn from_text(seq_num: usize, start_time_ms: u64, end_time_ms: u64, text: &str) -> Self {
        Self::new(seq_num, start_time_ms, end_time_ms, split_lines(text))
    }

    // @returns: Lines joined with '\n'
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    // @returns: Unicode scalar count across all lines
    pub fn char_count(&self) -> usize {
        self.lines.iter().map(|l| l.chars().count()).sum()
    }

    /// Copy of this entry carrying different text but the same position and timing.
    ///
    /// Blank translations keep the original lines so the entry stays a
    /// well-formed block.
    pub fn with_text(&self, text: &str) -> Self {
        let lines = split_lines(text);
        if lines.is_empty() {
            return self.clone();
        }
        Self::new(self.seq_num, self.start_time_ms, self.end_time_ms, lines)
    }

    /// Parse an SRT timestamp to milliseconds
    pub fn parse_timestamp(timestamp: &str) -> Result<u64> {
        let parts: Vec<&str> = timestamp.trim().split(&[':', ',', '.'][..]).collect();

        if parts.len() != 4 {
            return Err(anyhow!("Invalid timestamp format: {}", timestamp));
        }

        let hours: u64 = parts[0].parse().context("Failed to parse hours")?;
        let minutes: u64 = parts[1].parse().context("Failed to parse minutes")?;
        let seconds: u64 = parts[2].parse().context("Failed to parse seconds")?;
        let millis: u64 = parts[3].parse().context("Failed to parse milliseconds")?;

        if minutes >= 60 || seconds >= 60 || millis >= 1000 {
            return Err(anyhow!("Invalid time components in timestamp: {}", timestamp));
        }

        Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
    }

    /// Format a timestamp in milliseconds to SRT format (HH:MM:SS,mmm)
    pub fn format_timestamp(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        let millis = ms % 1_000;

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
    }

    fn write_block(&self, out: &mut String, newline: &str) {
        out.push_str(&self.seq_num.to_string());
        out.push_str(newline);
        out.push_str(&Self::format_timestamp(self.start_time_ms));
        out.push_str(" --> ");
        out.push_str(&Self::format_timestamp(self.end_time_ms));
        out.push_str(newline);
        for line in &self.lines {
            out.push_str(line);
            out.push_str(newline);
        }
        out.push_str(newline);
    }
}

impl fmt::Display for SubtitleEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut block = String::new();
        self.write_block(&mut block, "\n");
        f.write_str(&block)
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim_end().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Line terminator used by a decoded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Encoding details recorded while decoding so output can mirror the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncodingInfo {
    /// Whether the raw text started with a UTF-8 BOM
    pub has_bom: bool,
    /// Line terminator convention
    pub line_ending: LineEnding,
}

/// Ordered subtitle document with its language and encoding metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCollection {
    /// Entries sorted by sequence number
    pub entries: Vec<SubtitleEntry>,

    /// Language of the entry text
    pub source_language: String,

    /// Encoding metadata of the raw document
    pub encoding: EncodingInfo,
}

impl SubtitleCollection {
    /// Create an empty subtitle collection
    pub fn new(source_language: impl Into<String>) -> Self {
        SubtitleCollection {
            entries: Vec::new(),
            source_language: source_language.into(),
            encoding: EncodingInfo::default(),
        }
    }

    /// Build a collection from entries, restoring sequence order
    pub fn from_entries(mut entries: Vec<SubtitleEntry>, source_language: impl Into<String>) -> Self {
        entries.sort_by_key(|e| e.seq_num);
        SubtitleCollection {
            entries,
            source_language: source_language.into(),
            encoding: EncodingInfo::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode raw bytes, replacing invalid UTF-8 sequences
    pub fn parse_srt_bytes(bytes: &[u8], source_language: &str) -> Result<Self, SubtitleError> {
        let content = String::from_utf8_lossy(bytes);
        Self::parse_srt_string(&content, source_language)
    }

    /// Parse SRT text into a collection.
    ///
    /// Blocks are separated by blank lines. A block that is not well formed is
    /// dropped on its own; the call only fails when nothing usable remains.
    pub fn parse_srt_string(content: &str, source_language: &str) -> Result<Self, SubtitleError> {
        let has_bom = content.starts_with(UTF8_BOM);
        let body = content.trim_start_matches(UTF8_BOM);
        let line_ending = if body.contains("\r\n") { LineEnding::CrLf } else { LineEnding::Lf };

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut dropped = 0usize;
        let mut block: Vec<&str> = Vec::new();

        let lines = body.split('\n').map(|l| l.trim_end_matches('\r'));
        for line in lines.chain(std::iter::once("")) {
            if !line.trim().is_empty() {
                block.push(line);
                continue;
            }
            if block.is_empty() {
                continue;
            }

            for run in split_glued_blocks(&block) {
                match parse_block(run) {
                    Ok(entry) => {
                        if seen.insert(entry.seq_num) {
                            entries.push(entry);
                        } else {
                            warn!("Skipping duplicate subtitle entry {}", entry.seq_num);
                            dropped += 1;
                        }
                    }
                    Err(reason) => {
                        warn!("Skipping malformed subtitle block starting with '{}': {}", run[0].trim(), reason);
                        dropped += 1;
                    }
                }
            }
            block.clear();
        }

        if entries.is_empty() {
            return Err(SubtitleError::Format(format!(
                "no well-formed subtitle blocks found ({} malformed)",
                dropped
            )));
        }

        entries.sort_by_key(|e| e.seq_num);
        debug!("Parsed {} subtitle entries ({} dropped)", entries.len(), dropped);

        Ok(SubtitleCollection {
            entries,
            source_language: source_language.to_string(),
            encoding: EncodingInfo { has_bom, line_ending },
        })
    }

    /// Encode back to SRT text using the recorded encoding
    pub fn to_srt_string(&self) -> String {
        let newline = self.encoding.line_ending.as_str();
        let mut out = String::new();
        if self.encoding.has_bom {
            out.push(UTF8_BOM);
        }
        for entry in &self.entries {
            entry.write_block(&mut out, newline);
        }
        out
    }

    /// Copy with every timing moved `offset_ms` earlier.
    ///
    /// Entries that end at or before the new zero are dropped and starts are
    /// clamped at zero. Sequence numbers and encoding are kept.
    pub fn shifted(&self, offset_ms: u64) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| e.end_time_ms > offset_ms)
            .map(|e| {
                let mut entry = e.clone();
                entry.start_time_ms = e.start_time_ms.saturating_sub(offset_ms);
                entry.end_time_ms = e.end_time_ms - offset_ms;
                entry
            })
            .collect();
        SubtitleCollection {
            entries,
            source_language: self.source_language.clone(),
            encoding: self.encoding,
        }
    }

    /// Index of the entry starting closest to `offset_ms`; ties go to the earlier entry
    pub fn closest_entry_index(&self, offset_ms: u64) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let distance = entry.start_time_ms.abs_diff(offset_ms);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((idx, distance)),
            }
        }
        best.map(|(idx, _)| idx)
    }
}

// A block missing its blank separator can hide the next entry inside it.
// Split wherever a number line is directly followed by a timing line.
fn split_glued_blocks<'a>(block: &'a [&'a str]) -> Vec<&'a [&'a str]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 3..block.len().saturating_sub(1) {
        if i - start >= 3
            && block[i].trim().parse::<usize>().is_ok()
            && TIMESTAMP_REGEX.is_match(block[i + 1].trim())
        {
            runs.push(&block[start..i]);
            start = i;
        }
    }
    runs.push(&block[start..]);
    runs
}

fn parse_block(lines: &[&str]) -> std::result::Result<SubtitleEntry, String> {
    if lines.len() < 3 {
        return Err(format!("expected at least 3 lines, found {}", lines.len()));
    }

    let seq_num: usize = lines[0]
        .trim()
        .trim_start_matches(UTF8_BOM)
        .parse()
        .map_err(|_| "sequence number is not a decimal integer".to_string())?;
    if seq_num == 0 {
        return Err("sequence number must be positive".to_string());
    }

    let caps = TIMESTAMP_REGEX
        .captures(lines[1].trim())
        .ok_or_else(|| "timing line does not match 'start --> end'".to_string())?;
    let start_ms = timestamp_from_captures(&caps, 1)?;
    let end_ms = timestamp_from_captures(&caps, 5)?;
    if end_ms < start_ms {
        return Err(format!("end time {} precedes start time {}", end_ms, start_ms));
    }

    let text: Vec<String> = lines[2..].iter().map(|l| l.trim_end().to_string()).collect();
    Ok(SubtitleEntry::new(seq_num, start_ms, end_ms, text))
}

fn timestamp_from_captures(caps: &regex::Captures, start_idx: usize) -> std::result::Result<u64, String> {
    let mut parts = [0u64; 4];
    for (offset, slot) in parts.iter_mut().enumerate() {
        *slot = caps
            .get(start_idx + offset)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| "unreadable timestamp".to_string())?;
    }
    let [hours, minutes, seconds, millis] = parts;
    if minutes >= 60 || seconds >= 60 {
        return Err("minutes and seconds must be below 60".to_string());
    }
    Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}
