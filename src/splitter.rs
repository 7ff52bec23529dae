//! Writes a monolithic novel out as the split directory layout:
//!
//! ```text
//! {out}/parts/第一部-风起.txt
//! {out}/chapters/第一部/第一章-开端.txt
//! {out}/metadata.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use novel_types::{Chapter, FileInfo, NovelMetadata, Part, PartSummary, SCHEMA_VERSION, StructureInfo};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::numeral::{parse_heading_number, to_numeral};
use crate::structure::{NovelStructure, SourceText, slice_lines};

pub const METADATA_FILE: &str = "metadata.json";

const MAX_FILENAME_CHARS: usize = 100;

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Make a heading title safe to use inside a filename.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    let truncated: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    RE_WHITESPACE.replace_all(&truncated, " ").into_owned()
}

/// One file produced by a split.
#[derive(Debug, Clone, Serialize)]
pub struct WrittenFile {
    pub number: u32,
    pub part_number: u32,
    pub path: PathBuf,
}

pub struct NovelSplitter<'a> {
    source: &'a SourceText,
    output_dir: PathBuf,
}

impl<'a> NovelSplitter<'a> {
    /// Creates `parts/` and `chapters/` under `output_dir`.
    pub fn new(source: &'a SourceText, output_dir: &Path) -> Result<Self> {
        let output_dir = output_dir.to_path_buf();
        for sub in ["parts", "chapters"] {
            let dir = output_dir.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(NovelSplitter { source, output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn split_by_parts(&self, parts: &[Part]) -> Result<Vec<WrittenFile>> {
        let lines = self.source.lines();
        let mut written = Vec::with_capacity(parts.len());

        for part in parts {
            let path = self
                .output_dir
                .join("parts")
                .join(labelled_name(&format!("第{}部", part.cn_number), &part.title));
            write_text(&path, &slice_lines(&lines, part.start_line, part.end_line))?;
            debug!(part = part.part_number, path = %path.display(), "wrote part");
            written.push(WrittenFile {
                number: part.part_number,
                part_number: part.part_number,
                path,
            });
        }

        info!(count = written.len(), "split by parts");
        Ok(written)
    }

    pub fn split_by_chapters(&self, chapters: &[Chapter]) -> Result<Vec<WrittenFile>> {
        let lines = self.source.lines();
        let mut written = Vec::with_capacity(chapters.len());

        for chapter in chapters {
            let part_dir = self
                .output_dir
                .join("chapters")
                .join(format!("第{}部", to_numeral(chapter.part_number)));
            std::fs::create_dir_all(&part_dir).map_err(|e| Error::io(&part_dir, e))?;

            let path = part_dir.join(labelled_name(
                &format!("第{}章", chapter_token(chapter)),
                &chapter.title,
            ));
            write_text(&path, &slice_lines(&lines, chapter.start_line, chapter.end_line))?;
            debug!(chapter = chapter.chapter_number, path = %path.display(), "wrote chapter");
            written.push(WrittenFile {
                number: chapter.chapter_number,
                part_number: chapter.part_number,
                path,
            });
        }

        info!(count = written.len(), "split by chapters");
        Ok(written)
    }
}

/// `{prefix}-{title}.txt`, or `{prefix}.txt` when nothing of the title
/// survives sanitising.
fn labelled_name(prefix: &str, title: &str) -> String {
    let title = sanitize_filename(title);
    if title.is_empty() {
        format!("{prefix}.txt")
    } else {
        format!("{prefix}-{title}.txt")
    }
}

/// Numeral used in a chapter filename. The heading's own token when it reads
/// back to the same number, decimal digits otherwise, so a re-scan of the
/// directory recovers every chapter.
fn chapter_token(chapter: &Chapter) -> String {
    match parse_heading_number(&chapter.cn_number) {
        Some(n) if n == chapter.chapter_number => chapter.cn_number.clone(),
        _ => chapter.chapter_number.to_string(),
    }
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| Error::io(path, e))
}

// ── metadata.json ────────────────────────────────────────────────────────

pub fn build_metadata(title: &str, source: &SourceText, structure: &NovelStructure) -> NovelMetadata {
    let parts = structure
        .parts
        .iter()
        .map(|p| PartSummary {
            part_number: p.part_number,
            cn_number: p.cn_number.clone(),
            title: p.title.clone(),
            start_line: p.start_line,
            end_line: p.end_line,
            chapters_count: structure
                .chapters
                .iter()
                .filter(|c| c.part_number == p.part_number)
                .count(),
        })
        .collect();

    NovelMetadata {
        schema_version: SCHEMA_VERSION,
        title: title.to_string(),
        generated_at: Local::now(),
        file_info: FileInfo {
            filepath: source.path.display().to_string(),
            size_bytes: source.size_bytes,
            size_mb: (source.size_bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0,
            total_lines: structure.total_lines,
            encoding: source.encoding.label().to_string(),
        },
        structure: StructureInfo {
            total_parts: structure.parts.len(),
            total_chapters: structure.chapters.len(),
            parts,
            chapters: structure.chapters.clone(),
        },
    }
}

pub fn save_metadata(output_dir: &Path, metadata: &NovelMetadata) -> Result<PathBuf> {
    let path = output_dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata).map_err(|source| Error::Json {
        path: path.clone(),
        source,
    })?;
    write_text(&path, &json)?;
    info!(path = %path.display(), bytes = json.len(), "saved metadata");
    Ok(path)
}

pub fn load_metadata(path: &Path) -> Result<NovelMetadata> {
    let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&json).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}
