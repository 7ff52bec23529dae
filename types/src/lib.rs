use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Printable placeholder for role attributes the reply did not mention.
pub const UNKNOWN: &str = "未知";

/// Version stamped into every JSON document this workspace writes.
pub const SCHEMA_VERSION: u32 = 1;

// ── Structure: parts and chapters ────────────────────────────────────────

/// A top-level division ("部") of a novel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: u32,
    /// Numeral token exactly as it appeared in the heading, e.g. "十一"
    pub cn_number: String,
    pub title: String,
    /// 1-based line of the heading
    pub start_line: usize,
    pub end_line: usize,
}

/// Where a chapter's text lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterLocation {
    /// A line range inside one monolithic source file (1-based, inclusive).
    Span {
        path: PathBuf,
        start_line: usize,
        end_line: usize,
    },
    /// A standalone chapter file from a pre-split directory.
    File { path: PathBuf },
}

impl ChapterLocation {
    pub fn path(&self) -> &Path {
        match self {
            Self::Span { path, .. } | Self::File { path } => path,
        }
    }
}

/// The smallest narrative unit, numbered globally across the whole work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_number: u32,
    pub cn_number: String,
    pub title: String,
    pub part_number: u32,
    #[serde(default)]
    pub part_title: String,
    pub start_line: usize,
    pub end_line: usize,
    pub location: ChapterLocation,
    /// Raw content length in characters, not a word count.
    pub character_count: usize,
}

// ── Extracted entities ───────────────────────────────────────────────────

/// A character profile parsed from a generation reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub name: String,
    pub age: String,
    pub gender: String,
    pub appearance: String,
    pub personality: String,
    pub identity: String,
    pub abilities: String,
    pub role_type: String,
    /// 0 means the reply gave no chapter, not chapter zero.
    pub first_appearance: u32,
}

impl RoleInfo {
    /// A record with every optional attribute set to [`UNKNOWN`].
    pub fn named(name: impl Into<String>) -> Self {
        RoleInfo {
            name: name.into(),
            age: UNKNOWN.to_string(),
            gender: UNKNOWN.to_string(),
            appearance: UNKNOWN.to_string(),
            personality: UNKNOWN.to_string(),
            identity: UNKNOWN.to_string(),
            abilities: UNKNOWN.to_string(),
            role_type: UNKNOWN.to_string(),
            first_appearance: 0,
        }
    }
}

/// One world/setting fact, keyed by its type ("世界观", "地点", …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingInfo {
    #[serde(rename = "type")]
    pub setting_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub role_a: String,
    pub role_b: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// 1–10
    pub strength: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeInfo {
    pub core_theme: String,
    pub emotional_tone: String,
    pub values: String,
}

/// A "key role on first appearance" line from a plot summary reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRole {
    pub name: String,
    pub first_appearance: u32,
    pub role_type: String,
    pub description: String,
}

// ── Extraction results ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreElements {
    pub elements_id: String,
    pub source_chapters: Vec<u32>,
    pub roles: Vec<RoleInfo>,
    pub settings: Vec<SettingInfo>,
    pub relationships: Vec<RelationshipInfo>,
    pub themes: ThemeInfo,
    pub generated_at: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotSummary {
    pub summary_id: String,
    pub source_chapters: Vec<u32>,
    pub content: String,
    pub key_roles: Vec<KeyRole>,
    pub key_settings: Vec<String>,
    pub generated_at: DateTime<Local>,
}

// ── metadata.json sidecar ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub filepath: String,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub total_lines: usize,
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartSummary {
    pub part_number: u32,
    pub cn_number: String,
    pub title: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chapters_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureInfo {
    pub total_parts: usize,
    pub total_chapters: usize,
    pub parts: Vec<PartSummary>,
    pub chapters: Vec<Chapter>,
}

/// Written next to a split novel by the splitter; read back by the chapter reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovelMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub title: String,
    pub generated_at: DateTime<Local>,
    pub file_info: FileInfo,
    pub structure: StructureInfo,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}
