mod crm;
mod db;
mod ocr;
mod parser;
mod settings;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ocr::OcrError;
use parser::lines::{Exclusion, LineClass, LineRecord};
use parser::ContactRecord;
use settings::Settings;

#[derive(Parser)]
#[command(name = "card_scanner", about = "Business card OCR to structured contacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the contacts database
    Init,
    /// OCR card images, extract contacts, store them and queue CRM sync
    Scan {
        /// Card images (jpg, png, ...)
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Store contacts without pushing them to the CRM
        #[arg(long)]
        no_sync: bool,
    },
    /// Run the extractor on OCR text (stdin, a file, or a directory of .txt files)
    Parse {
        path: Option<PathBuf>,
        /// Print how each line was classified
        #[arg(long)]
        explain: bool,
    },
    /// Recent contacts table
    List {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show one stored contact as JSON
    Show { id: i64 },
    /// Push contacts the CRM has not accepted yet
    Sync {
        /// Max contacts to push (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show contact and sync statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            println!("Database ready: {}", settings.database_path.display());
            Ok(())
        }
        Commands::Scan { images, no_sync } => scan(&settings, &images, no_sync).await,
        Commands::Parse { path, explain } => parse(path.as_deref(), explain),
        Commands::List { limit } => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_contacts(&conn, limit)?;
            if rows.is_empty() {
                println!("No contacts yet. Run 'scan' first.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<22} | {:<22} | {:<20} | {:<26} | {:<16} | {:<4}",
                "#", "Name", "Company", "Title", "Email", "Phone", "CRM"
            );
            println!("{}", "-".repeat(132));
            for r in &rows {
                let c = &r.record;
                let crm = match (&r.crm_synced_at, &r.crm_error) {
                    (Some(_), _) => "ok",
                    (None, Some(_)) => "err",
                    (None, None) => "-",
                };
                println!(
                    "{:>4} | {:<22} | {:<22} | {:<20} | {:<26} | {:<16} | {:<4}",
                    r.id,
                    cell(&c.name, 22),
                    cell(&c.company, 22),
                    cell(&c.job_title, 20),
                    cell(&c.email, 26),
                    cell(&c.phone, 16),
                    crm
                );
            }
            println!("\n{} contacts | details: show <id>", rows.len());
            Ok(())
        }
        Commands::Show { id } => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            match db::fetch_contact(&conn, id)? {
                Some(contact) => {
                    println!("{}", serde_json::to_string_pretty(&contact)?);
                    Ok(())
                }
                None => bail!("Contact {} not found", id),
            }
        }
        Commands::Sync { limit } => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let pending = db::fetch_unsynced(&conn, limit)?;
            if pending.is_empty() {
                println!("Nothing to sync.");
                return Ok(());
            }

            let client = crm::CrmClient::from_settings(&settings)?;
            if client.is_mock() {
                info!("No CARDSCAN_CRM_ENDPOINT set, using mock CRM");
            }
            println!("Syncing {} contacts...", pending.len());
            let sync = crm::CrmSync::spawn(client, settings.crm_concurrency);
            for contact in pending {
                sync.enqueue(contact.id, contact.record);
            }
            let outcomes = sync.finish().await;
            db::save_sync_outcomes(&conn, &outcomes)?;
            print_sync_summary(&outcomes);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Contacts:  {}", s.total);
            println!("Synced:    {}", s.synced);
            println!("Failed:    {}", s.failed);
            println!("Pending:   {}", s.pending);
            println!("Empty:     {}", s.empty);
            println!("\nFields filled:");
            println!("  name      {}", s.with_name);
            println!("  email     {}", s.with_email);
            println!("  phone     {}", s.with_phone);
            println!("  company   {}", s.with_company);
            println!("  job_title {}", s.with_job_title);
            println!("  website   {}", s.with_website);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

#[derive(Default)]
struct ScanCounts {
    stored: usize,
    empty: usize,
    no_text: usize,
    failed: usize,
}

impl ScanCounts {
    fn print(&self) {
        println!(
            "Stored {} contacts ({} with nothing recognized), {} without text, {} OCR failures.",
            self.stored, self.empty, self.no_text, self.failed,
        );
    }
}

/// OCR → extract → store, one image at a time. CRM pushes run in the
/// background and are only collected after every result has been printed.
/// A storage failure stops the loop, but pushes already queued are still
/// collected and recorded before the error is returned.
async fn scan(settings: &Settings, images: &[PathBuf], no_sync: bool) -> Result<()> {
    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;
    let ocr = ocr::OcrClient::from_settings(settings)?;
    let sync = if no_sync {
        None
    } else {
        let client = crm::CrmClient::from_settings(settings)?;
        if client.is_mock() {
            info!("No CARDSCAN_CRM_ENDPOINT set, using mock CRM");
        }
        Some(crm::CrmSync::spawn(client, settings.crm_concurrency))
    };

    let mut counts = ScanCounts::default();
    let mut stored = Ok(());
    for path in images {
        let source = path.display().to_string();
        let raw_text = match ocr.detect_text_in_file(path).await {
            Ok(text) => text,
            Err(OcrError::NoTextDetected) => {
                println!("{}: no text detected", source);
                counts.no_text += 1;
                continue;
            }
            Err(e) => {
                warn!("OCR failed for {}: {}", source, e);
                println!("{}: OCR failed: {}", source, e);
                counts.failed += 1;
                continue;
            }
        };

        if let Err(e) = store_scan(&conn, &source, raw_text, sync.as_ref(), &mut counts) {
            stored = Err(e);
            break;
        }
    }
    counts.print();

    if let Some(sync) = sync {
        let outcomes = finish_sync(&conn, sync).await;
        print_sync_summary(&outcomes);
    }

    stored?;
    if counts.stored == 0 {
        bail!("No contacts extracted from {} image(s)", images.len());
    }
    Ok(())
}

fn store_scan(
    conn: &rusqlite::Connection,
    source: &str,
    raw_text: String,
    sync: Option<&crm::CrmSync>,
    counts: &mut ScanCounts,
) -> Result<()> {
    let record = parser::extract_contact(&raw_text);
    let provenance = db::Provenance {
        source: source.to_string(),
        raw_text,
        scanned_at: Utc::now(),
    };
    let id = db::save_contact(conn, &record, &provenance)
        .with_context(|| format!("Failed to store contact from {}", source))?;
    counts.stored += 1;
    if record.is_empty() {
        counts.empty += 1;
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "id": id,
            "source": source,
            "contact": &record,
        }))?
    );
    if let Some(sync) = sync {
        sync.enqueue(id, record);
    }
    Ok(())
}

/// Wait for queued pushes and record them. A bookkeeping failure is only
/// logged; the contacts stay pending and `sync` picks them up again.
async fn finish_sync(conn: &rusqlite::Connection, sync: crm::CrmSync) -> Vec<db::SyncOutcome> {
    let outcomes = sync.finish().await;
    if let Err(e) = db::save_sync_outcomes(conn, &outcomes) {
        warn!("Failed to record CRM sync results: {}", e);
    }
    outcomes
}

fn print_sync_summary(outcomes: &[db::SyncOutcome]) {
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    println!(
        "CRM sync: {} pushed, {} failed{}",
        outcomes.len() - failed,
        failed,
        if failed > 0 { " (retry with 'sync')" } else { "" }
    );
}

// ── Parse ──

struct ParsedText {
    source: String,
    record: ContactRecord,
    lines: Option<Vec<LineRecord>>,
}

fn parse(path: Option<&Path>, explain: bool) -> Result<()> {
    let parsed = match path {
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            vec![parse_text("stdin".into(), &text, explain)]
        }
        Some(p) if p.is_dir() => parse_dir(p, explain)?,
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            vec![parse_text(p.display().to_string(), &text, explain)]
        }
    };

    for item in &parsed {
        println!(
            "{}",
            serde_json::to_string(&serde_json::json!({
                "source": item.source,
                "contact": item.record,
            }))?
        );
        if let Some(lines) = &item.lines {
            for line in lines {
                println!("  {:<14} {}", class_label(line.class), line.text);
            }
        }
    }

    if parsed.len() > 1 {
        let empty = parsed.iter().filter(|p| p.record.is_empty()).count();
        println!("\nParsed {} files ({} with nothing recognized).", parsed.len(), empty);
    }
    Ok(())
}

fn parse_text(source: String, text: &str, explain: bool) -> ParsedText {
    ParsedText {
        source,
        record: parser::extract_contact(text),
        lines: explain.then(|| parser::lines::classify_lines(text)),
    }
}

/// Every `.txt` file in `dir`, parsed in parallel; output keeps file-name order.
fn parse_dir(dir: &Path, explain: bool) -> Result<Vec<ParsedText>> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("No .txt files in {}", dir.display());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let parsed = files
        .par_iter()
        .map(|p| {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            pb.inc(1);
            Ok(parse_text(p.display().to_string(), &text, explain))
        })
        .collect::<Result<Vec<_>>>();

    pb.finish_and_clear();
    parsed
}

fn class_label(class: LineClass) -> String {
    match class {
        LineClass::Name => "name".into(),
        LineClass::Company => "company".into(),
        LineClass::JobTitle => "job_title".into(),
        LineClass::Unclassified => "-".into(),
        LineClass::Excluded(Exclusion::TooShort) => "skip:short".into(),
        LineClass::Excluded(Exclusion::TooLong) => "skip:long".into(),
        LineClass::Excluded(Exclusion::Field(kind)) => format!("skip:{}", kind.as_str()),
    }
}

fn cell(value: &Option<String>, max: usize) -> String {
    value.as_deref().map(|v| truncate(v, max)).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
