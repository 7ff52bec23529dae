//! JSON snapshots of extraction results.
//!
//! One document per extraction call, under
//! `{root}/{kind dir}/chapters_{start}_to_{end}_{YYYYmmdd_HHMMSS}.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use novel_types::{CoreElements, PlotSummary, SCHEMA_VERSION};
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};

pub const OUTPUT_DIR: &str = "output";

/// A result type that can be written as a snapshot.
pub trait SnapshotPayload: Serialize {
    /// Value of the `kind` field.
    const KIND: &'static str;
    /// Subdirectory of the output root.
    const DIR: &'static str;

    fn source_chapters(&self) -> &[u32];
    fn generated_at(&self) -> DateTime<Local>;
}

impl SnapshotPayload for CoreElements {
    const KIND: &'static str = "core_elements";
    const DIR: &'static str = "core_elements";

    fn source_chapters(&self) -> &[u32] {
        &self.source_chapters
    }

    fn generated_at(&self) -> DateTime<Local> {
        self.generated_at
    }
}

impl SnapshotPayload for PlotSummary {
    const KIND: &'static str = "plot_summary";
    const DIR: &'static str = "plot_summaries";

    fn source_chapters(&self) -> &[u32] {
        &self.source_chapters
    }

    fn generated_at(&self) -> DateTime<Local> {
        self.generated_at
    }
}

#[derive(Serialize)]
struct Snapshot<'a, T: Serialize> {
    schema_version: u32,
    kind: &'static str,
    #[serde(flatten)]
    payload: &'a T,
}

pub fn snapshot_path<T: SnapshotPayload>(root: &Path, payload: &T) -> PathBuf {
    let chapters = payload.source_chapters();
    let start = chapters.first().copied().unwrap_or(0);
    let end = chapters.last().copied().unwrap_or(0);
    let stamp = payload.generated_at().format("%Y%m%d_%H%M%S");
    root.join(T::DIR)
        .join(format!("chapters_{start}_to_{end}_{stamp}.json"))
}

pub fn save_snapshot<T: SnapshotPayload>(root: &Path, payload: &T) -> Result<PathBuf> {
    let path = snapshot_path(root, payload);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }

    let snapshot = Snapshot {
        schema_version: SCHEMA_VERSION,
        kind: T::KIND,
        payload,
    };
    let json = serde_json::to_string_pretty(&snapshot).map_err(|source| Error::Json {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, &json).map_err(|e| Error::io(&path, e))?;
    info!(kind = T::KIND, path = %path.display(), bytes = json.len(), "saved snapshot");
    Ok(path)
}
