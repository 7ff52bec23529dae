mod config;
mod dedup;
mod encoding;
mod error;
mod extractor;
mod generation;
mod numeral;
mod output;
mod reader;
mod response;
mod splitter;
mod structure;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, PromptSource};
use encoding::EncodingDetector;
use extractor::{CoreElementExtractor, PlotSummarizer};
use generation::{ChatClient, TextGenerator};
use numeral::to_numeral;
use reader::ChapterReader;
use splitter::NovelSplitter;
use structure::SourceText;

#[derive(Parser)]
#[command(
    name = "novel_extract",
    about = "Chinese novel structure parser and entity extractor"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a monolithic novel into parts/, chapters/ and metadata.json
    Split {
        /// Novel text file (UTF-8 or GB family)
        input: PathBuf,
        /// Output directory, defaults to the file stem next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Novel title for metadata.json, defaults to the file stem
        #[arg(long)]
        title: Option<String>,
        /// Skip writing parts/
        #[arg(long)]
        no_parts: bool,
    },
    /// Print the part/chapter structure of a novel file or split directory
    Structure {
        path: PathBuf,
        /// First chapter to list
        #[arg(long)]
        from: Option<u32>,
        /// Last chapter to list
        #[arg(long)]
        to: Option<u32>,
        /// Print chapter records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the text of chapters START..=END
    ReadChapters {
        path: PathBuf,
        start: u32,
        end: u32,
    },
    /// Extract roles, settings, relationships and themes → output/core_elements/
    CoreElements {
        path: PathBuf,
        start: u32,
        end: u32,
        /// Prompt style key, overrides the config file
        #[arg(long)]
        style: Option<String>,
        /// Snapshot root directory
        #[arg(short, long, default_value = output::OUTPUT_DIR)]
        output: PathBuf,
    },
    /// Summarize the plot of chapters START..=END → output/plot_summaries/
    PlotSummary {
        path: PathBuf,
        start: u32,
        end: u32,
        #[arg(long)]
        style: Option<String>,
        #[arg(short, long, default_value = output::OUTPUT_DIR)]
        output: PathBuf,
    },
    /// List the configured prompt styles
    ListStyles,
    /// Show which generator prompts each style defines or inherits
    ListGenerators {
        /// Only this style
        #[arg(long)]
        style: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("cannot load configuration")?;

    match cli.command {
        Command::Split {
            input,
            output,
            title,
            no_parts,
        } => run_split(&input, output, title, no_parts),
        Command::Structure { path, from, to, json } => run_structure(&path, from, to, json),
        Command::ReadChapters { path, start, end } => run_read(&path, start, end),
        Command::CoreElements {
            path,
            start,
            end,
            style,
            output,
        } => {
            apply_style(&mut config, style)?;
            run_core_elements(&config, &path, start, end, &output)
        }
        Command::PlotSummary {
            path,
            start,
            end,
            style,
            output,
        } => {
            apply_style(&mut config, style)?;
            run_plot_summary(&config, &path, start, end, &output)
        }
        Command::ListStyles => {
            run_list_styles(&config);
            Ok(())
        }
        Command::ListGenerators { style } => run_list_generators(&config, style.as_deref()),
    }
}

fn apply_style(config: &mut AppConfig, style: Option<String>) -> anyhow::Result<()> {
    if let Some(style) = style {
        config.prompts.style = style;
        config.validate()?;
    }
    Ok(())
}

fn check_range(start: u32, end: u32) -> anyhow::Result<()> {
    if start == 0 || end < start {
        bail!("invalid chapter range {start}-{end}");
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data).context("JSON serialization failed")?;
    println!("{json}");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  SPLIT MODE: monolithic file → parts/, chapters/, metadata.json
// ═══════════════════════════════════════════════════════════════════════

fn run_split(
    input: &Path,
    output: Option<PathBuf>,
    title: Option<String>,
    no_parts: bool,
) -> anyhow::Result<()> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "novel".to_string());
    let output = output.unwrap_or_else(|| input.with_file_name(&stem));
    let title = title.unwrap_or(stem);

    let detector = EncodingDetector::new();
    let source = SourceText::load(input, &detector)
        .with_context(|| format!("cannot load {}", input.display()))?;
    let structure = source.structure();
    if structure.chapters.is_empty() {
        bail!("no chapter headings found in {}", input.display());
    }

    let splitter = NovelSplitter::new(&source, &output)?;
    if !no_parts {
        splitter.split_by_parts(&structure.parts)?;
    }
    let written = splitter.split_by_chapters(&structure.chapters)?;
    let metadata = splitter::build_metadata(&title, &source, &structure);
    let meta_path = splitter::save_metadata(splitter.output_dir(), &metadata)?;

    println!("{} ({})", title, source.encoding);
    println!("  parts:    {}", structure.parts.len());
    println!("  chapters: {}", written.len());
    println!("  lines:    {}", structure.total_lines);
    println!("  output:   {}", splitter.output_dir().display());
    println!("  metadata: {}", meta_path.display());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  STRUCTURE MODE: list parts and chapters
// ═══════════════════════════════════════════════════════════════════════

fn run_structure(path: &Path, from: Option<u32>, to: Option<u32>, json: bool) -> anyhow::Result<()> {
    let reader = ChapterReader::open(path)?;
    let chapters = if from.is_some() || to.is_some() {
        reader.chapters_in_range(from.unwrap_or(1), to.unwrap_or(u32::MAX))?
    } else {
        reader.chapters()?
    };

    if json {
        return print_json(&chapters);
    }

    match reader.metadata() {
        Ok(meta) => eprintln!("{} ({} chapters in metadata)", meta.title, meta.structure.total_chapters),
        Err(e) => tracing::debug!(error = %e, "no metadata sidecar"),
    }
    eprintln!("Layout: {:?}", reader.layout());
    eprintln!("Encoding: {}", reader.encoding());

    let mut part = 0;
    for c in &chapters {
        if c.part_number != part {
            part = c.part_number;
            println!("第{}部 {}", to_numeral(part), c.part_title);
        }
        println!(
            "  {:>4}  第{}章 {}  ({} chars)",
            c.chapter_number, c.cn_number, c.title, c.character_count
        );
    }
    eprintln!("\nTotal: {} chapters", chapters.len());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  READ MODE: print chapter text
// ═══════════════════════════════════════════════════════════════════════

fn run_read(path: &Path, start: u32, end: u32) -> anyhow::Result<()> {
    check_range(start, end)?;
    let reader = ChapterReader::open(path)?;
    let batch = reader.read_range(start, end)?;

    for (number, content) in &batch.chapters {
        println!("═══ 第{number}章 ═══");
        println!("{}", content.trim_end());
        println!();
    }
    for skip in &batch.skipped {
        eprintln!("  skipped chapter {}: {}", skip.chapter_number, skip.reason);
    }
    eprintln!(
        "Read {} chapter(s), skipped {}",
        batch.chapters.len(),
        batch.skipped.len()
    );
    if batch.is_empty() {
        bail!("no readable chapters between {start} and {end}");
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  EXTRACTION MODES: chapters → generation → output/*/…json
// ═══════════════════════════════════════════════════════════════════════

fn run_core_elements(config: &AppConfig, path: &Path, start: u32, end: u32, output: &Path) -> anyhow::Result<()> {
    check_range(start, end)?;
    let reader = ChapterReader::open(path)?;
    let client = ChatClient::from_env(&config.generation)?;
    let generator = client.as_ref().map(|c| c as &dyn TextGenerator);

    let elements = CoreElementExtractor::new(config, generator)
        .extract_by_range(&reader, start, end)
        .with_context(|| format!("core element extraction failed for chapters {start}-{end}"))?;
    let saved = output::save_snapshot(output, &elements)?;

    println!("{}", elements.elements_id);
    println!("  chapters: {:?}", elements.source_chapters);
    println!("  roles:");
    for r in &elements.roles {
        println!("    {} ({}, 第{}章)", r.name, r.role_type, r.first_appearance);
    }
    println!("  settings:");
    for s in &elements.settings {
        println!("    {}：{}", s.setting_type, s.content);
    }
    println!("  relationships:");
    for r in &elements.relationships {
        println!("    {} ↔ {}：{} ({}/10)", r.role_a, r.role_b, r.relationship_type, r.strength);
    }
    println!("  theme: {}", elements.themes.core_theme);
    println!("  saved: {}", saved.display());
    Ok(())
}

fn run_plot_summary(config: &AppConfig, path: &Path, start: u32, end: u32, output: &Path) -> anyhow::Result<()> {
    check_range(start, end)?;
    let reader = ChapterReader::open(path)?;
    let client = ChatClient::from_env(&config.generation)?;
    let generator = client.as_ref().map(|c| c as &dyn TextGenerator);

    let summary = PlotSummarizer::new(config, generator)
        .generate_by_range(&reader, start, end)
        .with_context(|| format!("plot summary failed for chapters {start}-{end}"))?;
    let saved = output::save_snapshot(output, &summary)?;

    println!("{}", summary.summary_id);
    println!("{}", summary.content);
    if !summary.key_roles.is_empty() {
        println!("\n关键角色:");
        for r in &summary.key_roles {
            println!("  {} 第{}章 {}", r.name, r.first_appearance, r.description);
        }
    }
    if !summary.key_settings.is_empty() {
        println!("\n重要设定:");
        for s in &summary.key_settings {
            println!("  {s}");
        }
    }
    eprintln!("  saved: {}", saved.display());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  STYLES
// ═══════════════════════════════════════════════════════════════════════

fn run_list_styles(config: &AppConfig) {
    for (key, name) in config.prompts.list_styles() {
        let marker = if key == config.prompts.style { "*" } else { " " };
        println!("{marker} {key:<10} {name}");
    }
}

fn run_list_generators(config: &AppConfig, style: Option<&str>) -> anyhow::Result<()> {
    let styles: Vec<(&str, &str)> = config
        .prompts
        .list_styles()
        .into_iter()
        .filter(|(k, _)| style.is_none_or(|s| s == *k))
        .collect();
    if let Some(key) = style
        && styles.is_empty()
    {
        bail!("unknown prompt style `{key}`");
    }

    let mut missing = 0;
    for (key, name) in styles {
        println!("{key} ({name})");
        for (kind, source) in config.prompts.generators(key)? {
            let (mark, note) = match source {
                PromptSource::Own => ("✓", "own prompt"),
                PromptSource::Default => ("✓", "default prompt"),
                PromptSource::Missing => {
                    missing += 1;
                    ("✗", "missing")
                }
            };
            println!("  {mark} {:<24} {note}", kind.as_str());
        }
    }
    if missing > 0 {
        bail!("{missing} generator prompt(s) missing");
    }
    eprintln!("All generator prompts present");
    Ok(())
}
