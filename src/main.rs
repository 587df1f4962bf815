use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use dotweaver::document::EditOp;
use dotweaver::import::load_document;
use dotweaver::manager::{Manager, RecordingObserver};
use dotweaver::notification::NotificationLevel;
use dotweaver::panic_handler::initialize_panic_handler;
use dotweaver::settings;

#[derive(Parser, Debug)]
#[command(name = "dotweaver")]
#[command(about = "Transcribe a plain-text document to braille and keep both views in sync")]
#[command(version)]
struct Cli {
    /// Plain-text document to open
    file: PathBuf,

    /// Section to print
    #[arg(long, short = 's', default_value_t = 0)]
    section: usize,

    /// Replace the text of block N (document order, from 0) before printing
    #[arg(long = "set", value_name = "BLOCK=TEXT")]
    edits: Vec<String>,

    /// Print the element map as JSON instead of the views
    #[arg(long)]
    json: bool,

    /// Settings file to use instead of the one in the config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save a new safety margin (extra braille pages) to the settings file
    #[arg(long, value_name = "PAGES")]
    safety_margin: Option<u32>,

    /// Save a new section window size to the settings file
    #[arg(long, value_name = "SECTIONS")]
    window_size: Option<usize>,

    #[arg(long, default_value = "dotweaver.log")]
    log_file: PathBuf,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn parse_edit(raw: &str) -> Result<(usize, String)> {
    let Some((block, text)) = raw.split_once('=') else {
        bail!("edit '{raw}' is not BLOCK=TEXT");
    };
    let block = block
        .trim()
        .parse()
        .with_context(|| format!("block index in '{raw}'"))?;
    Ok((block, text.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    initialize_panic_handler();
    info!("Starting dotweaver on {}", cli.file.display());

    match &cli.config {
        Some(path) => settings::load_settings_from_path(path),
        None => settings::load_settings(),
    }
    if let Some(pages) = cli.safety_margin {
        info!("Setting safety margin to {pages} page(s)");
        settings::set_safety_margin(pages);
    }
    if let Some(sections) = cli.window_size {
        info!("Setting window size to {sections} section(s)");
        settings::set_window_size(sections);
    }

    let doc = load_document(&cli.file, settings::get_section_size())?;
    let observer = RecordingObserver::new();
    let mut manager = Manager::with_grade_one(
        doc,
        settings::session_config(),
        Box::new(observer.clone()),
    )?;

    for raw in &cli.edits {
        let (index, text) = parse_edit(raw)?;
        let block = manager.document().blocks().get(index).copied();
        let Some(block) = block else {
            bail!("there is no block {index}");
        };
        let path = manager.apply_edit(&EditOp::SetText { block, text })?;
        info!("Edit of block {index} applied via {path:?}");
    }
    manager.wait_for_formatting(true)?;

    if cli.section >= manager.sections().len() {
        bail!(
            "section {} out of range ({} sections)",
            cli.section,
            manager.sections().len()
        );
    }
    let map = manager.buffer_section(cli.section)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(map)?);
    } else if let Some(views) = manager.views() {
        println!("{}", views.source);
        println!("{}", views.braille);
    }

    for notification in observer.notifications() {
        match notification.level {
            NotificationLevel::Error => error!("{}", notification.message),
            NotificationLevel::Warning => warn!("{}", notification.message),
            NotificationLevel::Info => info!("{}", notification.message),
        }
        eprintln!("{}", notification.message);
    }

    manager.close()?;
    info!("Shutting down dotweaver");
    Ok(())
}
