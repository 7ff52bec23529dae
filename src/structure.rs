//! Part/chapter structure of a novel, from a monolithic text or from a
//! pre-split chapter directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use novel_types::{Chapter, ChapterLocation, Part};
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::encoding::{EncodingDetector, TextEncoding};
use crate::error::{Error, Result};
use crate::numeral::parse_heading_number;

// ── Heading patterns ─────────────────────────────────────────────────────
//
// Matched against the trimmed line:
//   第一部 风起
//   第十二章 夜行
//   第135章 归来

static RE_PART_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^第([零〇一二三四五六七八九十百千两0-9]+)部\s+(.+)$").unwrap()
});

static RE_CHAPTER_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^第([零〇一二三四五六七八九十百千两0-9]+)章\s+(.+)$").unwrap()
});

// Split layout names:
//   第一部/
//   第十一章-燃烧的火刑架.txt
//   第十二章.txt            (title empty after sanitising)
static RE_PART_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^第(.+?)部").unwrap());

static RE_CHAPTER_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^第(.+?)章(?:-(.+))?\.txt$").unwrap());

/// Parts and chapters recovered from one source.
#[derive(Debug, Clone, Default)]
pub struct NovelStructure {
    pub parts: Vec<Part>,
    pub chapters: Vec<Chapter>,
    pub total_lines: usize,
}

// ── Monolithic source ────────────────────────────────────────────────────

/// Split into lines the way `readlines()` does: endings kept, a trailing
/// fragment without newline still counts.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Join lines `start..=end` (1-based, clamped to the available lines).
pub fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    let from = start.saturating_sub(1).min(lines.len());
    let to = end.min(lines.len()).max(from);
    lines[from..to].concat()
}

/// A whole source file decoded with its detected encoding.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub path: PathBuf,
    pub text: String,
    pub encoding: TextEncoding,
    pub size_bytes: u64,
}

impl SourceText {
    pub fn load(path: &Path, detector: &EncodingDetector) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if !meta.is_file() {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        let encoding = detector.detect(Some(path));
        let text = crate::encoding::decode_file(path, encoding)?;
        info!(path = %path.display(), %encoding, bytes = meta.len(), "loaded source text");
        Ok(SourceText {
            path: path.to_path_buf(),
            text,
            encoding,
            size_bytes: meta.len(),
        })
    }

    pub fn lines(&self) -> Vec<&str> {
        split_lines(&self.text)
    }

    pub fn structure(&self) -> NovelStructure {
        parse_text(&self.text, &self.path)
    }
}

/// Scan a monolithic text for part and chapter headings.
///
/// Every chapter's location is a line span inside `source`.
pub fn parse_text(text: &str, source: &Path) -> NovelStructure {
    let lines = split_lines(text);
    let total_lines = lines.len();

    let mut parts: Vec<Part> = Vec::new();
    let mut chapters: Vec<Chapter> = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        let line_no = idx + 1;

        if let Some(caps) = RE_PART_HEADING.captures(line) {
            let cn = &caps[1];
            let prev = parts.last().map_or(0, |p| p.part_number);
            let part_number = parse_heading_number(cn).unwrap_or_else(|| {
                warn!(line = line_no, numeral = cn, "unparseable part numeral, using {}", prev + 1);
                prev + 1
            });
            parts.push(Part {
                part_number,
                cn_number: cn.to_string(),
                title: caps[2].trim().to_string(),
                start_line: line_no,
                end_line: 0,
            });
        } else if let Some(caps) = RE_CHAPTER_HEADING.captures(line) {
            let cn = &caps[1];
            let prev = chapters.last().map_or(0, |c| c.chapter_number);
            let chapter_number = parse_heading_number(cn).unwrap_or_else(|| {
                warn!(line = line_no, numeral = cn, "unparseable chapter numeral, using {}", prev + 1);
                prev + 1
            });
            chapters.push(Chapter {
                chapter_number,
                cn_number: cn.to_string(),
                title: caps[2].trim().to_string(),
                part_number: 1,
                part_title: String::new(),
                start_line: line_no,
                end_line: 0,
                location: ChapterLocation::File {
                    path: source.to_path_buf(),
                },
                character_count: 0,
            });
        }
    }

    // Second pass: close each range at the next heading of the same kind.
    let part_starts: Vec<usize> = parts.iter().map(|p| p.start_line).collect();
    for (i, part) in parts.iter_mut().enumerate() {
        part.end_line = part_starts
            .get(i + 1)
            .map_or(total_lines, |next| next - 1);
    }

    let chapter_starts: Vec<usize> = chapters.iter().map(|c| c.start_line).collect();
    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.end_line = chapter_starts
            .get(i + 1)
            .map_or(total_lines, |next| next - 1);

        if let Some(part) = parts.iter().rev().find(|p| p.start_line <= chapter.start_line) {
            chapter.part_number = part.part_number;
            chapter.part_title = part.title.clone();
        }

        chapter.location = ChapterLocation::Span {
            path: source.to_path_buf(),
            start_line: chapter.start_line,
            end_line: chapter.end_line,
        };
        chapter.character_count = lines[chapter.start_line - 1..chapter.end_line]
            .iter()
            .map(|l| l.chars().count())
            .sum();
    }

    info!(
        parts = parts.len(),
        chapters = chapters.len(),
        total_lines,
        "scanned structure"
    );

    NovelStructure {
        parts,
        chapters,
        total_lines,
    }
}

// ── Pre-split directories ────────────────────────────────────────────────

/// What a chapter file says about itself once decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMeasure {
    pub lines: usize,
    pub characters: usize,
    /// Title from a chapter heading on the first line. Filenames lose
    /// characters to sanitising, the heading does not.
    pub heading_title: Option<String>,
}

impl FileMeasure {
    pub fn of(text: &str) -> Self {
        let heading_title = text
            .lines()
            .next()
            .and_then(|first| RE_CHAPTER_HEADING.captures(first.trim()))
            .map(|caps| caps[2].trim().to_string());
        FileMeasure {
            lines: split_lines(text).len(),
            characters: text.chars().count(),
            heading_title,
        }
    }

    pub fn apply(self, chapter: &mut Chapter) {
        chapter.end_line = self.lines;
        chapter.character_count = self.characters;
        if let Some(title) = self.heading_title {
            chapter.title = title;
        }
    }
}

/// Parse `第<numeral>章-<title>.txt` or `第<numeral>章.txt` → (number,
/// numeral token, title).
pub fn parse_chapter_filename(name: &str) -> Option<(u32, String, String)> {
    let caps = RE_CHAPTER_FILE.captures(name)?;
    let cn = &caps[1];
    let Some(number) = parse_heading_number(cn) else {
        warn!(file = name, numeral = cn, "unparseable chapter numeral in filename, skipping");
        return None;
    };
    let title = caps.get(2).map_or("", |m| m.as_str().trim());
    Some((number, cn.to_string(), title.to_string()))
}

/// Part number from a `第<numeral>部` directory name.
pub fn parse_part_dir_name(name: &str) -> Option<u32> {
    let caps = RE_PART_DIR.captures(name)?;
    parse_heading_number(&caps[1])
}

/// `.txt` files directly inside `dir`, sorted by name.
pub fn list_text_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
        .collect()
}

/// Chapters of one part directory. A directory whose name carries no part
/// numeral is treated as part 1.
pub fn scan_part_dir(dir: &Path, measure: &dyn Fn(&Path) -> FileMeasure) -> Vec<Chapter> {
    let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let part_number = parse_part_dir_name(dir_name).unwrap_or(1);
    let mut chapters = chapters_in_dir(dir, part_number, dir_name, measure);
    chapters.sort_by_key(|c| c.chapter_number);
    chapters
}

/// Chapters of every `第<numeral>部` directory under a `chapters/` root.
pub fn scan_chapters_root(root: &Path, measure: &dyn Fn(&Path) -> FileMeasure) -> Vec<Chapter> {
    let mut chapters = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_str().unwrap_or("");
        if !RE_PART_DIR.is_match(dir_name) {
            debug!(dir = dir_name, "not a part directory");
            continue;
        }
        let Some(part_number) = parse_part_dir_name(dir_name) else {
            warn!(dir = dir_name, "unparseable part numeral, skipping directory");
            continue;
        };
        chapters.extend(chapters_in_dir(entry.path(), part_number, dir_name, measure));
    }

    chapters.sort_by_key(|c| c.chapter_number);
    info!(root = %root.display(), chapters = chapters.len(), "scanned chapter directories");
    chapters
}

fn chapters_in_dir(
    dir: &Path,
    part_number: u32,
    part_title: &str,
    measure: &dyn Fn(&Path) -> FileMeasure,
) -> Vec<Chapter> {
    list_text_files(dir)
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let (chapter_number, cn_number, title) = parse_chapter_filename(name)?;
            let m = measure(&path);
            let mut chapter = Chapter {
                chapter_number,
                cn_number,
                title,
                part_number,
                part_title: part_title.to_string(),
                start_line: 1,
                end_line: 0,
                character_count: 0,
                location: ChapterLocation::File { path },
            };
            m.apply(&mut chapter);
            Some(chapter)
        })
        .collect()
}

// ── Range queries ────────────────────────────────────────────────────────

/// Chapters numbered `start..=end`, ascending. Chapters whose backing file
/// is no longer a regular file are dropped with a warning.
pub fn chapters_in_range(chapters: &[Chapter], start: u32, end: u32) -> Vec<Chapter> {
    let mut selected: Vec<Chapter> = chapters
        .iter()
        .filter(|c| (start..=end).contains(&c.chapter_number))
        .filter(|c| {
            let ok = c.location.path().is_file();
            if !ok {
                warn!(
                    chapter = c.chapter_number,
                    path = %c.location.path().display(),
                    "chapter file missing, excluded from range"
                );
            }
            ok
        })
        .cloned()
        .collect();
    selected.sort_by_key(|c| c.chapter_number);
    selected
}
