//! Core-element extraction and plot summaries over a batch of chapters.
//!
//! Both extractors render a user prompt from the configured template, hand it
//! to the generator under the active style's system prompt, and parse the
//! reply. Without a generator they return fixed placeholder records so the
//! pipeline can be exercised offline.

use chrono::{DateTime, Local};
use novel_types::{CoreElements, PlotSummary, RoleInfo, SettingInfo, ThemeInfo, UNKNOWN};
use tracing::{info, warn};

use crate::config::{AppConfig, PromptKind, render_template};
use crate::dedup::{dedup_roles, dedup_settings};
use crate::error::{Error, Result};
use crate::generation::{GenerationRequest, RetryPolicy, TextGenerator, generate_with_retry};
use crate::reader::{BatchRead, ChapterReader};
use crate::response::{ParsedResponse, ResponseParser};

pub const CHAPTER_SEPARATOR: &str = "\n\n=== 章节分隔 ===\n\n";

fn stamp(prefix: &str) -> (String, DateTime<Local>) {
    let now = Local::now();
    (format!("{prefix}_{}", now.format("%Y%m%d_%H%M%S")), now)
}

/// Shared request path: combine, render, generate, parse.
struct Pipeline<'a> {
    config: &'a AppConfig,
    generator: &'a dyn TextGenerator,
}

impl Pipeline<'_> {
    fn run(&self, kind: PromptKind, contents: &[&str]) -> Result<ParsedResponse> {
        let prompts = &self.config.prompts;
        let (template, max_tokens) = match kind {
            PromptKind::CoreElements => (&prompts.core_template, self.config.generation.core_max_tokens),
            PromptKind::PlotSummary => (&prompts.summary_template, self.config.generation.summary_max_tokens),
        };
        let combined = contents.join(CHAPTER_SEPARATOR);
        let request = GenerationRequest {
            system_prompt: prompts.system_prompt(kind)?.to_string(),
            user_prompt: render_template(template, contents.len(), &combined),
            temperature: self.config.generation.temperature,
            max_tokens,
        };

        let reply = generate_with_retry(
            self.generator,
            &request,
            &RetryPolicy::from(&self.config.generation),
        )?;
        Ok(ResponseParser::new(&self.config.labels).parse(&reply))
    }
}

fn read_batch(reader: &ChapterReader, start: u32, end: u32) -> Result<BatchRead> {
    let batch = reader.read_range(start, end)?;
    if batch.is_empty() {
        return Err(Error::NoChapters { start, end });
    }
    Ok(batch)
}

// ── Core elements ────────────────────────────────────────────────────────

pub struct CoreElementExtractor<'a> {
    config: &'a AppConfig,
    generator: Option<&'a dyn TextGenerator>,
}

impl<'a> CoreElementExtractor<'a> {
    /// `generator: None` selects the offline placeholder output.
    pub fn new(config: &'a AppConfig, generator: Option<&'a dyn TextGenerator>) -> Self {
        Self { config, generator }
    }

    pub fn extract(&self, contents: &[&str], chapter_numbers: &[u32]) -> Result<CoreElements> {
        let Some(generator) = self.generator else {
            warn!("no generation backend, returning placeholder core elements");
            return Ok(mock_core_elements(chapter_numbers));
        };

        let parsed = Pipeline {
            config: self.config,
            generator,
        }
        .run(PromptKind::CoreElements, contents)?;

        let policy = self.config.dedup.policy;
        let (elements_id, generated_at) = stamp("core_elements");
        let elements = CoreElements {
            elements_id,
            source_chapters: chapter_numbers.to_vec(),
            roles: dedup_roles(parsed.roles, policy),
            settings: dedup_settings(parsed.settings),
            relationships: parsed.relationships,
            themes: parsed.themes,
            generated_at,
        };
        info!(
            id = %elements.elements_id,
            roles = elements.roles.len(),
            settings = elements.settings.len(),
            relationships = elements.relationships.len(),
            "extracted core elements"
        );
        Ok(elements)
    }

    pub fn extract_by_range(&self, reader: &ChapterReader, start: u32, end: u32) -> Result<CoreElements> {
        let batch = read_batch(reader, start, end)?;
        self.extract(&batch.contents(), &batch.numbers())
    }
}

fn mock_core_elements(chapter_numbers: &[u32]) -> CoreElements {
    let (elements_id, generated_at) = stamp("mock_core_elements");
    let protagonist = RoleInfo {
        age: "20岁".to_string(),
        gender: "男".to_string(),
        appearance: "普通大学生".to_string(),
        personality: "勇敢善良".to_string(),
        identity: "穿越者".to_string(),
        abilities: UNKNOWN.to_string(),
        role_type: "主角".to_string(),
        first_appearance: chapter_numbers.first().copied().unwrap_or(0),
        ..RoleInfo::named("主角")
    };
    let setting = |setting_type: &str, content: &str| SettingInfo {
        setting_type: setting_type.to_string(),
        content: content.to_string(),
    };

    CoreElements {
        elements_id,
        source_chapters: chapter_numbers.to_vec(),
        roles: vec![protagonist],
        settings: vec![setting("世界观", "一个未知的世界"), setting("背景", "主角穿越到异世界")],
        relationships: Vec::new(),
        themes: ThemeInfo {
            core_theme: "冒险、成长".to_string(),
            emotional_tone: "积极向上".to_string(),
            values: "勇气、友谊".to_string(),
        },
        generated_at,
    }
}

// ── Plot summary ─────────────────────────────────────────────────────────

pub struct PlotSummarizer<'a> {
    config: &'a AppConfig,
    generator: Option<&'a dyn TextGenerator>,
}

impl<'a> PlotSummarizer<'a> {
    pub fn new(config: &'a AppConfig, generator: Option<&'a dyn TextGenerator>) -> Self {
        Self { config, generator }
    }

    pub fn generate(&self, contents: &[&str], chapter_numbers: &[u32]) -> Result<PlotSummary> {
        let Some(generator) = self.generator else {
            warn!("no generation backend, returning placeholder summary");
            return Ok(mock_summary(contents, chapter_numbers));
        };

        let parsed = Pipeline {
            config: self.config,
            generator,
        }
        .run(PromptKind::PlotSummary, contents)?;

        let (summary_id, generated_at) = stamp("plot_summary");
        let summary = PlotSummary {
            summary_id,
            source_chapters: chapter_numbers.to_vec(),
            content: parsed.summary,
            key_roles: parsed.key_roles,
            key_settings: parsed.key_settings,
            generated_at,
        };
        info!(
            id = %summary.summary_id,
            chars = summary.content.chars().count(),
            key_roles = summary.key_roles.len(),
            "generated plot summary"
        );
        Ok(summary)
    }

    pub fn generate_by_range(&self, reader: &ChapterReader, start: u32, end: u32) -> Result<PlotSummary> {
        let batch = read_batch(reader, start, end)?;
        self.generate(&batch.contents(), &batch.numbers())
    }
}

fn mock_summary(contents: &[&str], chapter_numbers: &[u32]) -> PlotSummary {
    let (summary_id, generated_at) = stamp("mock_summary");
    let first = chapter_numbers.first().copied().unwrap_or(0);
    let last = chapter_numbers.last().copied().unwrap_or(0);
    let chars = contents.join(CHAPTER_SEPARATOR).chars().count();
    PlotSummary {
        summary_id,
        source_chapters: chapter_numbers.to_vec(),
        content: format!("这是第{first}章到第{last}章的模拟梗概。内容共{chars}字。"),
        key_roles: Vec::new(),
        key_settings: Vec::new(),
        generated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupPolicy;
    use crate::generation::{GenerationError, ScriptedGenerator};

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.generation.backoff_secs = 0;
        config
    }

    const CORE_REPLY: &str = "\
【角色信息】
- 路西恩：
  年龄：20岁
  类型：主角
  首次出场：第1章
- 艾丽萨：
  性别：女
- 路西恩：
  年龄：30岁
  性别：男
【设定信息】
- 世界观：浮空群岛
- 世界观：另一种说法
【关系信息】
- 路西恩与艾丽萨：搭档（强度：8/10）
【核心主题】
- 核心主题：成长
";

    // ── CoreElementExtractor ─────────────────────────────────────────

    #[test]
    fn test_extract_parses_and_dedups() {
        let config = config();
        let generator = ScriptedGenerator::replying(CORE_REPLY);
        let extractor = CoreElementExtractor::new(&config, Some(&generator));

        let elements = extractor.extract(&["甲章", "乙章"], &[1, 2]).unwrap();
        assert!(elements.elements_id.starts_with("core_elements_"));
        assert_eq!(elements.source_chapters, vec![1, 2]);
        assert_eq!(elements.roles.len(), 2);
        assert_eq!(elements.roles[0].age, "20岁");
        assert_eq!(elements.roles[0].gender, UNKNOWN);
        assert_eq!(elements.roles[0].first_appearance, 1);
        assert_eq!(elements.settings.len(), 1);
        assert_eq!(elements.settings[0].content, "浮空群岛");
        assert_eq!(elements.relationships[0].strength, 8);
        assert_eq!(elements.themes.core_theme, "成长");
    }

    #[test]
    fn test_extract_request_shape() {
        let config = config();
        let generator = ScriptedGenerator::replying(CORE_REPLY);
        CoreElementExtractor::new(&config, Some(&generator))
            .extract(&["甲章", "乙章"], &[1, 2])
            .unwrap();

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.max_tokens, 2048);
        assert_eq!(req.temperature, 0.7);
        assert!(req.system_prompt.contains("核心元素"));
        assert!(req.user_prompt.contains("以下2章"));
        assert!(req.user_prompt.contains("甲章\n\n=== 章节分隔 ===\n\n乙章"));
    }

    #[test]
    fn test_merge_policy_from_config() {
        let mut config = config();
        config.dedup.policy = DedupPolicy::MergeUnknown;
        let generator = ScriptedGenerator::replying(CORE_REPLY);
        let elements = CoreElementExtractor::new(&config, Some(&generator))
            .extract(&["甲"], &[1])
            .unwrap();
        assert_eq!(elements.roles[0].age, "20岁");
        assert_eq!(elements.roles[0].gender, "男");
    }

    #[test]
    fn test_extract_retries_then_fails() {
        let config = config();
        let generator = ScriptedGenerator::new([
            Err(GenerationError::Transient("timeout".to_string())),
            Err(GenerationError::Fatal("HTTP 400".to_string())),
        ]);
        let err = CoreElementExtractor::new(&config, Some(&generator))
            .extract(&["甲"], &[1])
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(GenerationError::Fatal(_))));
        assert_eq!(generator.call_count(), 2);
    }

    #[test]
    fn test_mock_core_elements() {
        let config = config();
        let elements = CoreElementExtractor::new(&config, None)
            .extract(&["甲"], &[7, 8])
            .unwrap();
        assert!(elements.elements_id.starts_with("mock_core_elements_"));
        assert_eq!(elements.roles[0].name, "主角");
        assert_eq!(elements.roles[0].first_appearance, 7);
        assert_eq!(elements.settings.len(), 2);
        assert!(elements.relationships.is_empty());
        assert_eq!(elements.themes.values, "勇气、友谊");
    }

    // ── PlotSummarizer ───────────────────────────────────────────────

    #[test]
    fn test_summary_sections() {
        let config = config();
        let generator = ScriptedGenerator::replying(
            "【剧情梗概】\n路西恩离开故乡。\n【关键角色首次出场】\n- 艾丽萨：首次出现在第2章，角色定位是配角\n【重要设定】\n- 浮空群岛\n",
        );
        let summary = PlotSummarizer::new(&config, Some(&generator))
            .generate(&["甲", "乙"], &[1, 2])
            .unwrap();
        assert!(summary.summary_id.starts_with("plot_summary_"));
        assert_eq!(summary.content, "路西恩离开故乡。");
        assert_eq!(summary.key_roles[0].name, "艾丽萨");
        assert_eq!(summary.key_roles[0].first_appearance, 2);
        assert_eq!(summary.key_settings, vec!["浮空群岛".to_string()]);
        assert_eq!(generator.requests()[0].max_tokens, 2000);
    }

    #[test]
    fn test_mock_summary_text() {
        let config = config();
        let summary = PlotSummarizer::new(&config, None)
            .generate(&["一二三", "四五"], &[3, 4])
            .unwrap();
        // 3 + 2 chars plus the separator
        let chars = 5 + CHAPTER_SEPARATOR.chars().count();
        assert_eq!(
            summary.content,
            format!("这是第3章到第4章的模拟梗概。内容共{chars}字。")
        );
        assert!(summary.key_roles.is_empty());
    }

    // ── by range ─────────────────────────────────────────────────────

    #[test]
    fn test_by_range_reads_chapter_files() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("chapters/第一部");
        std::fs::create_dir_all(&part).unwrap();
        std::fs::write(part.join("第一章-开端.txt"), "雨夜").unwrap();
        std::fs::write(part.join("第二章-相遇.txt"), "桥头").unwrap();
        std::fs::write(part.join("第三章-离别.txt"), "渡口").unwrap();

        let config = config();
        let reader = ChapterReader::open(&dir.path().join("chapters")).unwrap();
        let generator = ScriptedGenerator::replying("【剧情梗概】\n相遇。");
        let summary = PlotSummarizer::new(&config, Some(&generator))
            .generate_by_range(&reader, 2, 3)
            .unwrap();
        assert_eq!(summary.source_chapters, vec![2, 3]);
        assert!(generator.requests()[0].user_prompt.contains("桥头\n\n=== 章节分隔 ===\n\n渡口"));
    }

    #[test]
    fn test_by_range_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("chapters/第一部");
        std::fs::create_dir_all(&part).unwrap();
        std::fs::write(part.join("第一章-开端.txt"), "雨夜").unwrap();

        let config = config();
        let reader = ChapterReader::open(&dir.path().join("chapters")).unwrap();
        let err = CoreElementExtractor::new(&config, None)
            .extract_by_range(&reader, 5, 9)
            .unwrap_err();
        assert!(matches!(err, Error::NoChapters { start: 5, end: 9 }));
    }
}
