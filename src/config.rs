//! Application configuration, loaded from TOML.
//!
//! ```toml
//! [generation]
//! base_url = "https://api.minimaxi.com/v1"
//! temperature = 0.7
//!
//! [prompts]
//! style = "wuxia"
//!
//! [dedup]
//! policy = "merge_unknown"
//! ```
//!
//! Every section is optional; missing keys take the defaults below.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dedup::DedupPolicy;
use crate::error::{Error, Result};

pub const DEFAULT_STYLE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub generation: GenerationConfig,
    pub prompts: PromptConfig,
    pub labels: SectionLabels,
    pub dedup: DedupConfig,
}

impl AppConfig {
    /// Defaults when `path` is `None`, otherwise the parsed and validated file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), style = %config.prompts.style, "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.generation.validate()?;
        self.prompts.validate()?;
        self.labels.validate()
    }
}

// ── [generation] ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer key.
    pub api_key_env: String,
    pub group_id_env: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub temperature: f32,
    pub core_max_tokens: u32,
    pub summary_max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.minimaxi.com/v1".to_string(),
            model: "M2-her".to_string(),
            api_key_env: "MINIMAX_API_KEY".to_string(),
            group_id_env: "MINIMAX_GROUP_ID".to_string(),
            timeout_secs: 120,
            max_attempts: 3,
            backoff_secs: 2,
            temperature: 0.7,
            core_max_tokens: 2048,
            summary_max_tokens: 2000,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("generation.base_url must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("generation.timeout_secs must be greater than 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("generation.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "generation.temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.core_max_tokens == 0 || self.summary_max_tokens == 0 {
            return Err(Error::Config("generation max tokens must be greater than 0".to_string()));
        }
        Ok(())
    }
}

// ── [prompts] ────────────────────────────────────────────────────────────

/// Which generator a system prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    CoreElements,
    PlotSummary,
}

impl PromptKind {
    pub const ALL: [PromptKind; 2] = [PromptKind::CoreElements, PromptKind::PlotSummary];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::CoreElements => "core_element_extractor",
            PromptKind::PlotSummary => "plot_summarizer",
        }
    }
}

/// Where a style's prompt for one generator resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    /// The style defines its own prompt.
    Own,
    /// Falls back to the default style's prompt.
    Default,
    Missing,
}

/// System prompts for one writing style. A missing prompt falls back to
/// the default style's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StylePrompts {
    /// Display name, e.g. "武侠风格"
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_element_extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_summarizer: Option<String>,
}

impl StylePrompts {
    fn get(&self, kind: PromptKind) -> Option<&str> {
        match kind {
            PromptKind::CoreElements => self.core_element_extractor.as_deref(),
            PromptKind::PlotSummary => self.plot_summarizer.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Active style key into `styles`.
    pub style: String,
    pub styles: BTreeMap<String, StylePrompts>,
    /// User prompt templates; `{chapter_count}` and `{chapter_content}` are
    /// substituted.
    pub core_template: String,
    pub summary_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let style = |name: &str, summary: Option<&str>| StylePrompts {
            name: name.to_string(),
            core_element_extractor: None,
            plot_summarizer: summary.map(str::to_string),
        };

        let mut styles = BTreeMap::new();
        styles.insert(
            DEFAULT_STYLE.to_string(),
            StylePrompts {
                name: "默认风格".to_string(),
                core_element_extractor: Some(DEFAULT_CORE_SYSTEM_PROMPT.to_string()),
                plot_summarizer: Some(DEFAULT_SUMMARY_SYSTEM_PROMPT.to_string()),
            },
        );
        styles.insert(
            "ancient".to_string(),
            style("古风", Some("你是一位精通古典文学的编辑，请用典雅凝练的文字概括小说剧情。")),
        );
        styles.insert(
            "modern".to_string(),
            style("现代都市", Some("你是一位现代都市小说编辑，请用简洁明快的文字概括小说剧情。")),
        );
        styles.insert(
            "scifi".to_string(),
            style("科幻", Some("你是一位科幻小说编辑，概括剧情时请保留关键的技术与世界设定。")),
        );
        styles.insert(
            "wuxia".to_string(),
            style("武侠", Some("你是一位武侠小说编辑，概括剧情时请突出门派、武功与江湖恩怨。")),
        );

        Self {
            style: DEFAULT_STYLE.to_string(),
            styles,
            core_template: DEFAULT_CORE_TEMPLATE.to_string(),
            summary_template: DEFAULT_SUMMARY_TEMPLATE.to_string(),
        }
    }
}

impl PromptConfig {
    /// System prompt for `kind` under the active style.
    pub fn system_prompt(&self, kind: PromptKind) -> Result<&str> {
        let style = self
            .styles
            .get(&self.style)
            .ok_or_else(|| Error::Config(format!("unknown prompt style `{}`", self.style)))?;
        if let Some(prompt) = style.get(kind) {
            return Ok(prompt);
        }
        warn!(
            style = %self.style,
            generator = kind.as_str(),
            "no prompt for generator in style, falling back to default"
        );
        self.styles
            .get(DEFAULT_STYLE)
            .and_then(|s| s.get(kind))
            .ok_or_else(|| Error::Config(format!("default style has no {} prompt", kind.as_str())))
    }

    /// How each generator's prompt resolves under `style`.
    pub fn generators(&self, style: &str) -> Result<Vec<(PromptKind, PromptSource)>> {
        let prompts = self
            .styles
            .get(style)
            .ok_or_else(|| Error::Config(format!("unknown prompt style `{style}`")))?;
        let default = self.styles.get(DEFAULT_STYLE);
        Ok(PromptKind::ALL
            .into_iter()
            .map(|kind| {
                let source = if prompts.get(kind).is_some() {
                    PromptSource::Own
                } else if default.and_then(|d| d.get(kind)).is_some() {
                    PromptSource::Default
                } else {
                    PromptSource::Missing
                };
                (kind, source)
            })
            .collect())
    }

    /// `(key, display name)` for every configured style.
    pub fn list_styles(&self) -> Vec<(&str, &str)> {
        self.styles
            .iter()
            .map(|(key, s)| (key.as_str(), s.name.as_str()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if !self.styles.contains_key(&self.style) {
            return Err(Error::Config(format!("unknown prompt style `{}`", self.style)));
        }
        let Some(default) = self.styles.get(DEFAULT_STYLE) else {
            return Err(Error::Config("prompts.styles must define `default`".to_string()));
        };
        for kind in PromptKind::ALL {
            if default.get(kind).is_none() {
                return Err(Error::Config(format!(
                    "default style has no {} prompt",
                    kind.as_str()
                )));
            }
        }
        for (name, template) in [
            ("core_template", &self.core_template),
            ("summary_template", &self.summary_template),
        ] {
            if !template.contains("{chapter_content}") {
                return Err(Error::Config(format!(
                    "prompts.{name} must contain {{chapter_content}}"
                )));
            }
        }
        Ok(())
    }
}

/// Substitute `{chapter_count}` and `{chapter_content}` in a user template.
pub fn render_template(template: &str, chapter_count: usize, content: &str) -> String {
    template
        .replace("{chapter_count}", &chapter_count.to_string())
        .replace("{chapter_content}", content)
}

const DEFAULT_CORE_SYSTEM_PROMPT: &str = "\
你是一位专业的小说分析师，负责从小说文本中提取核心元素。
请严格按照以下格式输出：
【角色信息】
- 角色名：
  年龄：
  性别：
  外貌：
  性格：
  身份：
  能力：
  类型：主角/配角/反派
  首次出场：第N章
【设定信息】
- 设定类型：内容
【关系信息】
- 角色A与角色B：关系类型（强度：N/10）
【核心主题】
- 核心主题：
- 情感基调：
- 价值观：";

const DEFAULT_SUMMARY_SYSTEM_PROMPT: &str = "\
你是一位专业的小说编辑，负责为小说章节撰写剧情梗概。
请严格按照以下格式输出：
【剧情梗概】
梗概正文
【关键角色首次出场】
- 角色名：首次出现在第N章，角色定位是X
【重要设定】
- 设定内容";

const DEFAULT_CORE_TEMPLATE: &str = "\
请从以下{chapter_count}章小说内容中提取核心元素，包括角色信息、设定信息、关系信息和核心主题：

{chapter_content}

要求：
1. 只提取小说中实际存在的角色、情节和设定，不要编造
2. 每个角色只提取一次，不要重复
3. 严格按照【角色信息】、【设定信息】、【关系信息】、【核心主题】的格式输出

请开始提取核心元素：";

const DEFAULT_SUMMARY_TEMPLATE: &str = "\
请将以下{chapter_count}章小说内容总结为剧情梗概：

{chapter_content}

请按照【剧情梗概】、【关键角色首次出场】、【重要设定】的格式输出。";

// ── [labels] ─────────────────────────────────────────────────────────────

/// Section heading labels recognised in generation replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionLabels {
    pub roles: String,
    pub settings: String,
    pub relationships: String,
    pub themes: String,
    pub summary: String,
    pub key_roles: String,
    pub key_settings: String,
}

impl Default for SectionLabels {
    fn default() -> Self {
        Self {
            roles: "角色信息".to_string(),
            settings: "设定信息".to_string(),
            relationships: "关系信息".to_string(),
            themes: "核心主题".to_string(),
            summary: "剧情梗概".to_string(),
            key_roles: "关键角色首次出场".to_string(),
            key_settings: "重要设定".to_string(),
        }
    }
}

impl SectionLabels {
    pub fn all(&self) -> [&str; 7] {
        [
            self.roles.as_str(),
            self.settings.as_str(),
            self.relationships.as_str(),
            self.themes.as_str(),
            self.summary.as_str(),
            self.key_roles.as_str(),
            self.key_settings.as_str(),
        ]
    }

    fn validate(&self) -> Result<()> {
        let labels = self.all();
        if labels.iter().any(|l| l.trim().is_empty()) {
            return Err(Error::Config("section labels must not be empty".to_string()));
        }
        for (i, a) in labels.iter().enumerate() {
            if labels[i + 1..].contains(a) {
                return Err(Error::Config(format!("duplicate section label `{a}`")));
            }
        }
        Ok(())
    }
}

// ── [dedup] ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub policy: DedupPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.prompts.style, DEFAULT_STYLE);
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.dedup.policy, DedupPolicy::KeepFirst);
        assert_eq!(config.labels, SectionLabels::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
            [generation]
            temperature = 0.3
            backoff_secs = 0

            [prompts]
            style = "wuxia"

            [labels]
            roles = "Characters"

            [dedup]
            policy = "merge_unknown"
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.temperature, 0.3);
        assert_eq!(config.generation.backoff(), Duration::ZERO);
        assert_eq!(config.generation.core_max_tokens, 2048);
        assert_eq!(config.prompts.style, "wuxia");
        assert_eq!(config.labels.roles, "Characters");
        assert_eq!(config.labels.settings, "设定信息");
        assert_eq!(config.dedup.policy, DedupPolicy::MergeUnknown);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml("[generation]\nmax_attempts = 0").is_err());
        assert!(AppConfig::from_toml("[generation]\ntemperature = 3.5").is_err());
        assert!(AppConfig::from_toml("[prompts]\nstyle = \"noir\"").is_err());
        assert!(AppConfig::from_toml("[labels]\nroles = \"设定信息\"").is_err());
        assert!(AppConfig::from_toml("[prompts]\ncore_template = \"无占位符\"").is_err());
        assert!(matches!(
            AppConfig::from_toml("not toml = = ="),
            Err(Error::Config(_))
        ));
    }

    // ── system_prompt ────────────────────────────────────────────────

    #[test]
    fn test_style_prompt_falls_back_to_default() {
        let mut prompts = PromptConfig {
            style: "wuxia".to_string(),
            ..PromptConfig::default()
        };
        let summary = prompts.system_prompt(PromptKind::PlotSummary).unwrap();
        assert!(summary.contains("武侠"));
        let core = prompts.system_prompt(PromptKind::CoreElements).unwrap();
        assert_eq!(core, DEFAULT_CORE_SYSTEM_PROMPT);

        prompts.style = "noir".to_string();
        assert!(prompts.system_prompt(PromptKind::PlotSummary).is_err());
    }

    #[test]
    fn test_generators_report_prompt_source() {
        let prompts = PromptConfig::default();
        assert_eq!(
            prompts.generators("wuxia").unwrap(),
            vec![
                (PromptKind::CoreElements, PromptSource::Default),
                (PromptKind::PlotSummary, PromptSource::Own),
            ]
        );
        assert!(
            prompts
                .generators(DEFAULT_STYLE)
                .unwrap()
                .iter()
                .all(|(_, source)| *source == PromptSource::Own)
        );
        assert!(prompts.generators("noir").is_err());

        let mut bare = PromptConfig::default();
        bare.styles.remove(DEFAULT_STYLE);
        assert_eq!(
            bare.generators("modern").unwrap()[0],
            (PromptKind::CoreElements, PromptSource::Missing)
        );
    }

    #[test]
    fn test_list_styles_sorted() {
        let prompts = PromptConfig::default();
        let keys: Vec<&str> = prompts.list_styles().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ancient", "default", "modern", "scifi", "wuxia"]);
    }

    #[test]
    fn test_render_template() {
        let out = render_template("共{chapter_count}章：{chapter_content}", 2, "甲\n乙");
        assert_eq!(out, "共2章：甲\n乙");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("app.toml"))).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(AppConfig::load(None).is_ok());
    }
}
