//! Deduplication of parsed roles and settings.

use std::collections::{HashMap, HashSet};

use novel_types::{RoleInfo, SettingInfo, UNKNOWN};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Attribute and setting labels that sometimes get misread as role names.
pub const FIELD_LABELS: [&str; 14] = [
    "年龄", "性别", "外貌", "性格", "身份", "能力", "类型", "出场", "世界观", "背景", "规则", "地点",
    "物品", "组织",
];

/// What to do with a role whose name was already seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Drop the later record entirely.
    #[default]
    KeepFirst,
    /// Keep the first record, filling its unknown fields from later ones.
    MergeUnknown,
}

/// Trimmed, whitespace-free, lower-cased.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn dedup_roles(roles: Vec<RoleInfo>, policy: DedupPolicy) -> Vec<RoleInfo> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<RoleInfo> = Vec::new();

    for role in roles {
        let key = normalize_name(&role.name);
        if key.is_empty() || FIELD_LABELS.contains(&key.as_str()) {
            debug!(name = %role.name, "dropping non-role entry");
            continue;
        }
        match index.get(&key) {
            Some(&i) => {
                debug!(name = %role.name, "duplicate role");
                if policy == DedupPolicy::MergeUnknown {
                    fill_unknown(&mut unique[i], role);
                }
            }
            None => {
                index.insert(key, unique.len());
                unique.push(role);
            }
        }
    }

    unique
}

fn fill_unknown(kept: &mut RoleInfo, later: RoleInfo) {
    let fill = |slot: &mut String, value: String| {
        if *slot == UNKNOWN && value != UNKNOWN {
            *slot = value;
        }
    };
    fill(&mut kept.age, later.age);
    fill(&mut kept.gender, later.gender);
    fill(&mut kept.appearance, later.appearance);
    fill(&mut kept.personality, later.personality);
    fill(&mut kept.identity, later.identity);
    fill(&mut kept.abilities, later.abilities);
    fill(&mut kept.role_type, later.role_type);
    if kept.first_appearance == 0 {
        kept.first_appearance = later.first_appearance;
    }
}

/// First record per `setting_type` wins.
pub fn dedup_settings(settings: Vec<SettingInfo>) -> Vec<SettingInfo> {
    let mut seen = HashSet::new();
    settings
        .into_iter()
        .filter(|s| seen.insert(s.setting_type.clone()))
        .collect()
}
