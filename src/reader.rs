//! Chapter store: one entry point over a monolithic novel file or any level
//! of the split directory layout.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use novel_types::{Chapter, ChapterLocation, NovelMetadata};
use serde::Serialize;
use tracing::{info, warn};

use crate::encoding::{self, EncodingDetector, TextEncoding};
use crate::error::{Error, Result};
use crate::splitter::{METADATA_FILE, load_metadata};
use crate::structure::{
    self, FileMeasure, SourceText, chapters_in_range, list_text_files, scan_chapters_root,
    scan_part_dir, slice_lines,
};

/// What kind of path the reader was opened on. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLayout {
    /// A single novel text file.
    Monolithic { file: PathBuf },
    /// One `第N部` directory holding chapter files.
    PartDirectory { dir: PathBuf },
    /// The `chapters/` directory holding part directories.
    ChaptersRoot { dir: PathBuf },
    /// A split novel's root, with `chapters/` and `metadata.json` inside.
    NovelRoot { root: PathBuf },
}

impl StoreLayout {
    pub fn detect(path: &Path) -> Result<Self> {
        if path.is_file() {
            return Ok(StoreLayout::Monolithic {
                file: path.to_path_buf(),
            });
        }
        if !path.is_dir() {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }

        let dir = path.to_path_buf();
        if path.file_name().is_some_and(|n| n == "chapters") {
            return Ok(StoreLayout::ChaptersRoot { dir });
        }
        let below_chapters = path.components().any(|c| c.as_os_str() == "chapters");
        if below_chapters || !list_text_files(path).is_empty() {
            return Ok(StoreLayout::PartDirectory { dir });
        }
        Ok(StoreLayout::NovelRoot { root: dir })
    }

    /// Where the `metadata.json` sidecar is expected.
    pub fn metadata_path(&self) -> PathBuf {
        let parent = |p: &Path, levels: usize| {
            let mut p = p.to_path_buf();
            for _ in 0..levels {
                p = p.parent().map(Path::to_path_buf).unwrap_or_default();
            }
            p
        };
        match self {
            StoreLayout::Monolithic { file } => parent(file, 1).join(METADATA_FILE),
            StoreLayout::PartDirectory { dir } => parent(dir, 2).join(METADATA_FILE),
            StoreLayout::ChaptersRoot { dir } => parent(dir, 1).join(METADATA_FILE),
            StoreLayout::NovelRoot { root } => root.join(METADATA_FILE),
        }
    }
}

/// A chapter that could not be read during a batch.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterSkip {
    pub chapter_number: u32,
    pub reason: String,
}

/// Result of a best-effort range read.
#[derive(Debug, Clone, Default)]
pub struct BatchRead {
    /// `(chapter_number, content)`, ascending.
    pub chapters: Vec<(u32, String)>,
    pub skipped: Vec<ChapterSkip>,
}

impl BatchRead {
    pub fn numbers(&self) -> Vec<u32> {
        self.chapters.iter().map(|(n, _)| *n).collect()
    }

    pub fn contents(&self) -> Vec<&str> {
        self.chapters.iter().map(|(_, c)| c.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

pub struct ChapterReader {
    layout: StoreLayout,
    detector: EncodingDetector,
    source: OnceCell<SourceText>,
}

impl ChapterReader {
    pub fn open(path: &Path) -> Result<Self> {
        let layout = StoreLayout::detect(path)?;
        info!(path = %path.display(), ?layout, "opened chapter store");
        Ok(ChapterReader {
            layout,
            detector: EncodingDetector::new(),
            source: OnceCell::new(),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Encoding committed for this reader, sampling the first chapter file on
    /// first use.
    pub fn encoding(&self) -> TextEncoding {
        if let Some(committed) = self.detector.committed() {
            return committed;
        }
        self.detector.detect(self.sample_file().as_deref())
    }

    fn sample_file(&self) -> Option<PathBuf> {
        match &self.layout {
            StoreLayout::Monolithic { file } => Some(file.clone()),
            StoreLayout::PartDirectory { dir } => list_text_files(dir).into_iter().next(),
            StoreLayout::ChaptersRoot { dir } => first_chapter_file(dir),
            StoreLayout::NovelRoot { root } => first_chapter_file(&root.join("chapters")),
        }
    }

    fn source(&self) -> Result<&SourceText> {
        if let Some(source) = self.source.get() {
            return Ok(source);
        }
        let StoreLayout::Monolithic { file } = &self.layout else {
            return Err(Error::Config(
                "line spans are only readable from a monolithic source".to_string(),
            ));
        };
        let loaded = SourceText::load(file, &self.detector)?;
        Ok(self.source.get_or_init(|| loaded))
    }

    fn measure(&self, path: &Path) -> FileMeasure {
        match encoding::decode_file(path, self.encoding()) {
            Ok(text) => FileMeasure::of(&text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot measure chapter file");
                FileMeasure::default()
            }
        }
    }

    /// Every chapter in the store, sorted by chapter number. In directory
    /// layouts this decodes every chapter file.
    pub fn chapters(&self) -> Result<Vec<Chapter>> {
        self.scan(&|p: &Path| self.measure(p))
    }

    /// Chapters as named on disk, without opening chapter files. Titles come
    /// from filenames and line/character counts are zero in directory
    /// layouts.
    fn index(&self) -> Result<Vec<Chapter>> {
        self.scan(&|_: &Path| FileMeasure::default())
    }

    fn scan(&self, measure: &dyn Fn(&Path) -> FileMeasure) -> Result<Vec<Chapter>> {
        let chapters = match &self.layout {
            StoreLayout::Monolithic { .. } => self.source()?.structure().chapters,
            StoreLayout::PartDirectory { dir } => scan_part_dir(dir, measure),
            StoreLayout::ChaptersRoot { dir } => scan_chapters_root(dir, measure),
            StoreLayout::NovelRoot { root } => {
                let dir = root.join("chapters");
                if !dir.is_dir() {
                    return Err(Error::NotFound { path: dir });
                }
                scan_chapters_root(&dir, measure)
            }
        };
        Ok(chapters)
    }

    /// Chapters `start..=end`. Only the selected chapter files are decoded.
    pub fn chapters_in_range(&self, start: u32, end: u32) -> Result<Vec<Chapter>> {
        let mut selected = chapters_in_range(&self.index()?, start, end);
        for chapter in &mut selected {
            if matches!(chapter.location, ChapterLocation::File { .. }) {
                let m = self.measure(chapter.location.path());
                m.apply(chapter);
            }
        }
        info!(start, end, count = selected.len(), "selected chapter range");
        Ok(selected)
    }

    pub fn read_content(&self, chapter: &Chapter) -> Result<String> {
        match &chapter.location {
            ChapterLocation::File { path } => {
                if !path.is_file() {
                    return Err(Error::NotFound { path: path.clone() });
                }
                encoding::decode_file(path, self.encoding())
            }
            ChapterLocation::Span {
                path,
                start_line,
                end_line,
            } => {
                let owned;
                let source = match self.source() {
                    Ok(s) if s.path == *path => s,
                    _ => {
                        owned = SourceText::load(path, &self.detector)?;
                        &owned
                    }
                };
                Ok(slice_lines(&source.lines(), *start_line, *end_line))
            }
        }
    }

    /// Read chapters `start..=end` in order. A chapter that fails to read is
    /// recorded in [`BatchRead::skipped`] and the batch carries on.
    pub fn read_range(&self, start: u32, end: u32) -> Result<BatchRead> {
        let mut batch = BatchRead::default();
        let mut wanted: Vec<Chapter> = self
            .index()?
            .into_iter()
            .filter(|c| (start..=end).contains(&c.chapter_number))
            .collect();
        wanted.sort_by_key(|c| c.chapter_number);

        for chapter in &wanted {
            match self.read_content(chapter) {
                Ok(content) => batch.chapters.push((chapter.chapter_number, content)),
                Err(e) => {
                    warn!(chapter = chapter.chapter_number, error = %e, "skipping unreadable chapter");
                    batch.skipped.push(ChapterSkip {
                        chapter_number: chapter.chapter_number,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            ok = batch.chapters.len(),
            total = wanted.len(),
            "read chapter range {start}-{end}"
        );
        Ok(batch)
    }

    /// The `metadata.json` sidecar written by the splitter.
    pub fn metadata(&self) -> Result<NovelMetadata> {
        load_metadata(&self.layout.metadata_path())
    }
}

fn first_chapter_file(chapters_dir: &Path) -> Option<PathBuf> {
    walk_part_dirs(chapters_dir)
        .into_iter()
        .find_map(|dir| list_text_files(&dir).into_iter().next())
}

fn walk_part_dirs(chapters_dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(chapters_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| structure::parse_part_dir_name(n).is_some())
        })
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::{NovelSplitter, build_metadata, save_metadata};

    const NOVEL: &str = "\
第一部 风起
第一章 开端
雨下了一夜。
第二章 相遇
她在桥头等他。
第二部 云涌
第三章 离别
船开走了。
";

    /// Monolithic file plus its split layout under `out/`.
    fn split_fixture(dir: &Path) -> PathBuf {
        let file = dir.join("novel.txt");
        std::fs::write(&file, NOVEL).unwrap();
        let source = SourceText::load(&file, &EncodingDetector::new()).unwrap();
        let structure = source.structure();
        let out = dir.join("out");
        NovelSplitter::new(&source, &out)
            .unwrap()
            .split_by_chapters(&structure.chapters)
            .unwrap();
        save_metadata(&out, &build_metadata("风与云", &source, &structure)).unwrap();
        out
    }

    // ── StoreLayout ──────────────────────────────────────────────────

    #[test]
    fn test_layout_detection() {
        let dir = tempfile::tempdir().unwrap();
        let out = split_fixture(dir.path());

        assert!(matches!(
            StoreLayout::detect(&dir.path().join("novel.txt")).unwrap(),
            StoreLayout::Monolithic { .. }
        ));
        assert!(matches!(
            StoreLayout::detect(&out).unwrap(),
            StoreLayout::NovelRoot { .. }
        ));
        assert!(matches!(
            StoreLayout::detect(&out.join("chapters")).unwrap(),
            StoreLayout::ChaptersRoot { .. }
        ));
        assert!(matches!(
            StoreLayout::detect(&out.join("chapters/第一部")).unwrap(),
            StoreLayout::PartDirectory { .. }
        ));
        assert!(matches!(
            StoreLayout::detect(&dir.path().join("missing")).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_loose_txt_directory_is_part_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("第一章-甲.txt"), "甲\n").unwrap();
        assert!(matches!(
            StoreLayout::detect(dir.path()).unwrap(),
            StoreLayout::PartDirectory { .. }
        ));
    }

    #[test]
    fn test_metadata_path_per_layout() {
        let root = PathBuf::from("/n");
        let cases = [
            (StoreLayout::Monolithic { file: root.join("novel.txt") }, "/n/metadata.json"),
            (StoreLayout::NovelRoot { root: root.clone() }, "/n/metadata.json"),
            (StoreLayout::ChaptersRoot { dir: root.join("chapters") }, "/n/metadata.json"),
            (
                StoreLayout::PartDirectory { dir: root.join("chapters/第一部") },
                "/n/metadata.json",
            ),
        ];
        for (layout, expected) in cases {
            assert_eq!(layout.metadata_path(), PathBuf::from(expected), "{layout:?}");
        }
    }

    // ── ChapterReader ────────────────────────────────────────────────

    #[test]
    fn test_every_layout_lists_same_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let out = split_fixture(dir.path());

        let key = |c: &Chapter| (c.chapter_number, c.part_number, c.title.clone());
        let list = |p: &Path| -> Vec<_> {
            ChapterReader::open(p).unwrap().chapters().unwrap().iter().map(key).collect()
        };

        let mono = list(&dir.path().join("novel.txt"));
        assert_eq!(mono.len(), 3);
        assert_eq!(list(&out), mono);
        assert_eq!(list(&out.join("chapters")), mono);
        assert_eq!(list(&out.join("chapters/第一部")), mono[..2].to_vec());
    }

    #[test]
    fn test_read_content_span_and_file_agree() {
        let dir = tempfile::tempdir().unwrap();
        let out = split_fixture(dir.path());

        let mono = ChapterReader::open(&dir.path().join("novel.txt")).unwrap();
        let split = ChapterReader::open(&out).unwrap();
        let a = mono.chapters_in_range(2, 2).unwrap();
        let b = split.chapters_in_range(2, 2).unwrap();
        let text = mono.read_content(&a[0]).unwrap();
        assert!(text.starts_with("第二章 相遇\n"));
        assert_eq!(text, split.read_content(&b[0]).unwrap());
    }

    #[test]
    fn test_read_range_skips_unreadable_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("chapters").join("第一部");
        std::fs::create_dir_all(&part).unwrap();
        for (n, cn) in [(1, "一"), (2, "二"), (3, "三"), (4, "四"), (5, "五")] {
            let path = part.join(format!("第{cn}章-章{n}.txt"));
            if n == 4 {
                std::fs::write(&path, [0xE7, 0xAC, 0xAC, 0xFF, 0xFE, 0x0A]).unwrap();
            } else {
                std::fs::write(&path, format!("第{cn}章 章{n}\n正文\n")).unwrap();
            }
        }

        let reader = ChapterReader::open(&dir.path().join("chapters")).unwrap();
        let batch = reader.read_range(1, 5).unwrap();
        assert_eq!(batch.numbers(), vec![1, 2, 3, 5]);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].chapter_number, 4);
        assert_eq!(reader.encoding(), TextEncoding::Utf8);
    }

    #[test]
    fn test_read_range_after_file_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let out = split_fixture(dir.path());
        let reader = ChapterReader::open(&out).unwrap();
        std::fs::remove_file(out.join("chapters/第一部/第一章-开端.txt")).unwrap();

        let batch = reader.read_range(1, 3).unwrap();
        assert_eq!(batch.numbers(), vec![2, 3]);
        assert!(batch.skipped.is_empty(), "deleted files are not listed at all");
    }

    #[test]
    fn test_range_measures_only_selected_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("第一部");
        std::fs::create_dir_all(&part).unwrap();
        std::fs::write(part.join("第一章-开端.txt"), "第一章 开端\n雨\n").unwrap();
        std::fs::write(part.join("第二章-谁.txt"), "第二章 谁?\n桥头等候\n").unwrap();
        std::fs::write(part.join("第三章-离别.txt"), [0xE7, 0xAC, 0xAC, 0xFF, 0xFE, 0x0A]).unwrap();

        let reader = ChapterReader::open(&part).unwrap();
        let picked = reader.chapters_in_range(2, 2).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].title, "谁?");
        assert_eq!(picked[0].end_line, 2);
        assert_eq!(picked[0].character_count, 12);

        let index = reader.index().unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.iter().all(|c| c.character_count == 0));
        assert_eq!(index[1].title, "谁");
    }

    #[test]
    fn test_gbk_chapter_directory() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("第一部");
        std::fs::create_dir_all(&part).unwrap();
        let (bytes, _, _) = encoding_rs::GBK.encode("第一章 开端\n雨下了一夜。\n");
        std::fs::write(part.join("第一章-开端.txt"), &bytes).unwrap();

        let reader = ChapterReader::open(&part).unwrap();
        let chapters = reader.chapters().unwrap();
        assert_eq!(reader.encoding(), TextEncoding::Gbk);
        assert_eq!(chapters[0].character_count, 14);
        let batch = reader.read_range(1, 1).unwrap();
        assert_eq!(batch.contents(), vec!["第一章 开端\n雨下了一夜。\n"]);
    }

    #[test]
    fn test_metadata_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let out = split_fixture(dir.path());

        let meta = ChapterReader::open(&out.join("chapters/第二部"))
            .unwrap()
            .metadata()
            .unwrap();
        assert_eq!(meta.title, "风与云");
        assert_eq!(meta.structure.total_chapters, 3);

        let err = ChapterReader::open(&dir.path().join("novel.txt"))
            .unwrap()
            .metadata()
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_novel_root_without_chapters_dir() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ChapterReader::open(dir.path()).unwrap();
        assert!(matches!(reader.chapters().unwrap_err(), Error::NotFound { .. }));
    }
}
