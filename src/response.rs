//! Parser for free-form generation replies.
//!
//! A reply is a sequence of labelled sections:
//!
//! ```text
//! 【角色信息】
//! - 路西恩：
//!   年龄：20岁
//!   首次出场：第1章
//! 【关系信息】
//! - 路西恩与艾丽萨：师徒（强度：8/10）
//! 【核心主题】
//! - 核心主题：成长
//! ```
//!
//! One forward scan over trimmed lines, with one open section and at most
//! one open role or setting record. The open record is flushed whenever a
//! heading is crossed and at end of input. Lines that fit no accepted form
//! are skipped; parsing never fails.

use std::sync::LazyLock;

use novel_types::{KeyRole, RelationshipInfo, RoleInfo, SettingInfo, ThemeInfo, UNKNOWN};
use regex::Regex;
use tracing::debug;

use crate::config::SectionLabels;
use crate::numeral::{parse_heading_number, to_int};

// ── Patterns ─────────────────────────────────────────────────────────────

// 路西恩与艾丽萨：师徒（强度：8/10）
// 路西恩与艾丽萨 - 师徒 (强度: 8/10)
static RE_RELATIONSHIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)与(.+?)\s*[：:\-]\s*(.+?)\s*[（(]\s*强度\s*[：:]\s*(\d+)\s*/\s*10\s*[）)]")
        .unwrap()
});

static RE_STRENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"强度\s*[：:]\s*(\d+)\s*/\s*10").unwrap());

static RE_STRENGTH_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[（(]?\s*强度\s*[：:]\s*\d+\s*/\s*10\s*[）)]?").unwrap()
});

static RE_CHAPTER_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*(\d+)\s*章").unwrap());

static RE_CHAPTER_NUMERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*([零〇一二三四五六七八九十两]+)\s*章").unwrap());

// 艾丽萨：首次出现在第2章，角色定位是配角
// 乔尔: 首次出场于第十一章, 角色定位为反派
static RE_KEY_ROLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*[:：]\s*首次出(?:现|场)(?:在|于)?\s*第\s*(.+?)\s*章\s*[，,]\s*角色定位(?:是|为)?\s*(.+)$")
        .unwrap()
});

/// Default strength for relationship lines that do not state one.
pub const DEFAULT_STRENGTH: u8 = 5;

// ── Result ───────────────────────────────────────────────────────────────

/// Everything recognised in one reply. Roles and settings are not yet
/// deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub roles: Vec<RoleInfo>,
    pub settings: Vec<SettingInfo>,
    pub relationships: Vec<RelationshipInfo>,
    pub themes: ThemeInfo,
    pub summary: String,
    pub key_roles: Vec<KeyRole>,
    pub key_settings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Roles,
    Settings,
    Relationships,
    Themes,
    Summary,
    KeyRoles,
    KeySettings,
}

// ── Field rules ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum RoleField {
    Age,
    Gender,
    Appearance,
    Personality,
    Identity,
    Abilities,
    RoleType,
    FirstAppearance,
}

/// Checked in order; the first label contained in the key wins.
const ROLE_FIELD_RULES: [(&str, RoleField); 8] = [
    ("年龄", RoleField::Age),
    ("性别", RoleField::Gender),
    ("外貌", RoleField::Appearance),
    ("性格", RoleField::Personality),
    ("身份", RoleField::Identity),
    ("能力", RoleField::Abilities),
    ("类型", RoleField::RoleType),
    ("出场", RoleField::FirstAppearance),
];

fn role_field(key: &str) -> Option<RoleField> {
    ROLE_FIELD_RULES
        .iter()
        .find(|(label, _)| key.contains(*label))
        .map(|(_, field)| *field)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThemeField {
    Core,
    Tone,
    Values,
}

const THEME_FIELD_RULES: [(&str, ThemeField); 3] = [
    ("主题", ThemeField::Core),
    ("情感", ThemeField::Tone),
    ("价值", ThemeField::Values),
];

fn theme_field(key: &str) -> Option<ThemeField> {
    THEME_FIELD_RULES
        .iter()
        .find(|(label, _)| key.contains(*label))
        .map(|(_, field)| *field)
}

fn theme_slot(themes: &mut ThemeInfo, field: ThemeField) -> &mut String {
    match field {
        ThemeField::Core => &mut themes.core_theme,
        ThemeField::Tone => &mut themes.emotional_tone,
        ThemeField::Values => &mut themes.values,
    }
}

// ── Line helpers ─────────────────────────────────────────────────────────

/// Text after a list bullet. `*` and `+` need a following space so that
/// `**bold**` is not read as a bullet.
fn strip_bullet(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let first = chars.next()?;
    let rest = chars.as_str();
    match first {
        '-' | '•' | '·' => Some(rest.trim_start()),
        '*' | '+' if rest.starts_with(char::is_whitespace) => Some(rest.trim_start()),
        _ => None,
    }
}

/// Split at the first ASCII or full-width colon.
fn split_kv(text: &str) -> Option<(&str, &str)> {
    let idx = text.find([':', '：'])?;
    let sep_len = text[idx..].chars().next().map_or(1, char::len_utf8);
    Some((&text[..idx], &text[idx + sep_len..]))
}

fn clean_key(key: &str) -> &str {
    key.trim().trim_matches('*').trim()
}

fn or_unknown(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

/// `第3章` or `第三章` → 3; 0 when absent.
pub fn parse_first_appearance(value: &str) -> u32 {
    RE_CHAPTER_DIGITS
        .captures(value)
        .and_then(|c| c[1].parse().ok())
        .or_else(|| RE_CHAPTER_NUMERAL.captures(value).map(|c| to_int(&c[1])))
        .unwrap_or(0)
}

fn clamp_strength(digits: &str) -> u8 {
    digits
        .parse::<u64>()
        .map(|n| n.clamp(1, 10) as u8)
        .unwrap_or(DEFAULT_STRENGTH)
}

/// `A与B：类型（强度：n/10）`, falling back to a looser split. `None` when
/// the line cannot be decomposed.
pub fn parse_relationship(text: &str) -> Option<RelationshipInfo> {
    parse_relationship_strict(text)
        .or_else(|| parse_relationship_loose(text))
        .filter(|r| !r.role_a.is_empty() && !r.role_b.is_empty() && !r.relationship_type.is_empty())
}

fn parse_relationship_strict(text: &str) -> Option<RelationshipInfo> {
    let caps = RE_RELATIONSHIP.captures(text)?;
    Some(RelationshipInfo {
        role_a: caps[1].trim().to_string(),
        role_b: caps[2].trim().to_string(),
        relationship_type: caps[3].trim().to_string(),
        strength: clamp_strength(&caps[4]),
    })
}

fn parse_relationship_loose(text: &str) -> Option<RelationshipInfo> {
    // A colon separates names from type; `-` only when there is none, since
    // transliterated names carry hyphens. Colons inside a strength note
    // don't count.
    let head = &text[..RE_STRENGTH.find(text).map_or(text.len(), |m| m.start())];
    let idx = head.find(['：', ':']).or_else(|| head.find('-'))?;
    let sep_len = text[idx..].chars().next().map_or(1, char::len_utf8);
    let (roles, relation) = (&text[..idx], &text[idx + sep_len..]);

    let mut names = roles.split('与');
    let (Some(a), Some(b), None) = (names.next(), names.next(), names.next()) else {
        return None;
    };

    let (relationship_type, strength) = match RE_STRENGTH.captures(relation) {
        Some(caps) => (
            RE_STRENGTH_NOTE.replace_all(relation, "").trim().to_string(),
            clamp_strength(&caps[1]),
        ),
        None => (relation.trim().to_string(), DEFAULT_STRENGTH),
    };

    Some(RelationshipInfo {
        role_a: a.trim().to_string(),
        role_b: b.trim().to_string(),
        relationship_type,
        strength,
    })
}

/// `名字：首次出现在第N章，角色定位是X`.
pub fn parse_key_role(text: &str) -> Option<KeyRole> {
    let caps = RE_KEY_ROLE.captures(text)?;
    let first_appearance = parse_heading_number(&caps[2]).unwrap_or(1).max(1);
    let role_type = caps[3].trim().trim_end_matches(['。', '.']).to_string();
    Some(KeyRole {
        name: clean_key(&caps[1]).to_string(),
        first_appearance,
        description: format!("{role_type}角色"),
        role_type,
    })
}

// ── Parser ───────────────────────────────────────────────────────────────

pub struct ResponseParser<'a> {
    labels: &'a SectionLabels,
}

struct Heading<'l> {
    section: Section,
    /// Text after the heading on the same line.
    rest: &'l str,
}

impl<'a> ResponseParser<'a> {
    pub fn new(labels: &'a SectionLabels) -> Self {
        ResponseParser { labels }
    }

    pub fn parse(&self, reply: &str) -> ParsedResponse {
        let mut scan = Scan::default();
        for raw in reply.lines() {
            let line = raw.trim();
            match self.heading(line) {
                Some(heading) => {
                    scan.enter(heading.section);
                    if !heading.rest.is_empty() {
                        scan.line(heading.rest);
                    }
                }
                None => scan.line(line),
            }
        }
        scan.finish()
    }

    fn section_for(&self, label: &str) -> Option<Section> {
        let l = self.labels;
        [
            (l.roles.as_str(), Section::Roles),
            (l.settings.as_str(), Section::Settings),
            (l.relationships.as_str(), Section::Relationships),
            (l.themes.as_str(), Section::Themes),
            (l.summary.as_str(), Section::Summary),
            (l.key_roles.as_str(), Section::KeyRoles),
            (l.key_settings.as_str(), Section::KeySettings),
        ]
        .into_iter()
        .find(|(name, _)| *name == label)
        .map(|(_, section)| section)
    }

    /// `【label】`, `label：`, or a bare label line, after markdown `#`/`*`
    /// decoration. An unknown bracketed label leaves every section.
    fn heading<'l>(&self, line: &'l str) -> Option<Heading<'l>> {
        let bare = line.trim_start_matches(|c: char| c == '#' || c == '*' || c.is_whitespace());

        if let Some(inner) = bare.strip_prefix('【') {
            let (label, rest) = inner.split_once('】')?;
            let section = self.section_for(label.trim()).unwrap_or(Section::Outside);
            let rest = rest
                .trim_start_matches(|c: char| c == '*' || c == '：' || c == ':')
                .trim();
            return Some(Heading { section, rest });
        }

        let bare = bare.trim_end_matches(|c: char| c == '#' || c == '*' || c.is_whitespace());
        if let Some((label, rest)) = split_kv(bare) {
            let section = self.section_for(clean_key(label))?;
            let rest = rest.trim_start_matches('*').trim();
            return Some(Heading { section, rest });
        }

        self.section_for(bare).map(|section| Heading { section, rest: "" })
    }
}

/// Mutable scan state for one reply.
struct Scan {
    section: Section,
    role: Option<RoleInfo>,
    setting: Option<SettingInfo>,
    theme_field: Option<ThemeField>,
    summary: Vec<String>,
    out: ParsedResponse,
}

impl Default for Scan {
    fn default() -> Self {
        Scan {
            section: Section::Outside,
            role: None,
            setting: None,
            theme_field: None,
            summary: Vec::new(),
            out: ParsedResponse::default(),
        }
    }
}

impl Scan {
    fn enter(&mut self, section: Section) {
        self.flush();
        self.theme_field = None;
        self.section = section;
    }

    fn flush(&mut self) {
        if let Some(role) = self.role.take() {
            self.out.roles.push(role);
        }
        if let Some(setting) = self.setting.take() {
            self.out.settings.push(setting);
        }
    }

    fn finish(mut self) -> ParsedResponse {
        self.flush();
        self.out.summary = self.summary.join("\n");
        self.out
    }

    fn line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        match self.section {
            Section::Outside => {}
            Section::Roles => self.role_line(line),
            Section::Settings => self.setting_line(line),
            Section::Relationships => self.relationship_line(line),
            Section::Themes => self.theme_line(line),
            Section::Summary => self.summary.push(line.to_string()),
            Section::KeyRoles => self.key_role_line(line),
            Section::KeySettings => {
                if let Some(text) = strip_bullet(line).filter(|t| !t.is_empty()) {
                    self.out.key_settings.push(text.to_string());
                }
            }
        }
    }

    fn role_line(&mut self, line: &str) {
        if let Some((key, _)) = strip_bullet(line).and_then(split_kv) {
            let key = clean_key(key);
            // "- 年龄：20" under an open role is an attribute, not a new role
            let is_attribute = self.role.is_some()
                && key.chars().count() <= 4
                && role_field(key).is_some();
            if !is_attribute {
                self.flush();
                self.role = Some(RoleInfo::named(key));
                return;
            }
        }

        let Some(role) = self.role.as_mut() else {
            debug!(line, "role attribute outside any role");
            return;
        };
        let Some((key, value)) = split_kv(strip_bullet(line).unwrap_or(line)) else {
            debug!(line, "skipping role line without separator");
            return;
        };
        let Some(field) = role_field(clean_key(key)) else {
            debug!(key, "unmapped role attribute");
            return;
        };
        match field {
            RoleField::Age => role.age = or_unknown(value),
            RoleField::Gender => role.gender = or_unknown(value),
            RoleField::Appearance => role.appearance = or_unknown(value),
            RoleField::Personality => role.personality = or_unknown(value),
            RoleField::Identity => role.identity = or_unknown(value),
            RoleField::Abilities => role.abilities = or_unknown(value),
            RoleField::RoleType => role.role_type = or_unknown(value),
            RoleField::FirstAppearance => role.first_appearance = parse_first_appearance(value),
        }
    }

    fn setting_line(&mut self, line: &str) {
        if let Some((key, value)) = strip_bullet(line).and_then(split_kv) {
            self.flush();
            self.setting = Some(SettingInfo {
                setting_type: clean_key(key).replace('-', ""),
                content: value.trim().to_string(),
            });
        } else if let Some(setting) = self.setting.as_mut() {
            setting.content.push(' ');
            setting.content.push_str(line);
        } else {
            debug!(line, "setting text outside any setting");
        }
    }

    fn relationship_line(&mut self, line: &str) {
        let Some(text) = strip_bullet(line) else {
            return;
        };
        match parse_relationship(text) {
            Some(rel) => self.out.relationships.push(rel),
            None => debug!(line, "skipping undecomposable relationship"),
        }
    }

    fn theme_line(&mut self, line: &str) {
        if let Some((key, value)) = strip_bullet(line).and_then(split_kv) {
            self.theme_field = theme_field(clean_key(key));
            if let Some(field) = self.theme_field {
                *theme_slot(&mut self.out.themes, field) = value.trim().to_string();
            }
        } else if let Some(field) = self.theme_field {
            let slot = theme_slot(&mut self.out.themes, field);
            slot.push(' ');
            slot.push_str(strip_bullet(line).unwrap_or(line));
        }
    }

    fn key_role_line(&mut self, line: &str) {
        let Some(text) = strip_bullet(line) else {
            return;
        };
        match parse_key_role(text) {
            Some(role) => self.out.key_roles.push(role),
            None => debug!(line, "skipping key role line"),
        }
    }
}
