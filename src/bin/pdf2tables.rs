//! CLI binary for edgequake-tables.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and `Backends`, then prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_tables::{
    extract, extract_to_dir, inspect, Backends, ExtractionConfig, ExtractionProgressCallback,
    ExtractionSummary, GeminiReasoningService, LlmReasoningService, PageSelection,
    ProgressCallback, ReasoningService, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner for whole-document stages and a page bar
/// for OCR, which is the only stage that reports per page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn page_style(&self) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting tables from {total_pages} pages…"))
        ));
    }

    fn on_stage_start(&self, stage: Stage) {
        if stage == Stage::Ocr {
            self.page_style();
            self.bar.set_position(0);
        }
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("");
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!("  {} {}", green("✓"), stage));
    }

    fn on_page_recognized(&self, _page: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_page_dropped(&self, page: usize, total: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_ocr_degraded(&self, page: usize) {
        self.bar.println(format!(
            "  {} accelerated OCR exhausted at page {page}; continuing on CPU workers",
            yellow("⚠")
        ));
    }

    fn on_table_refined(&self, table_id: usize, refined: bool) {
        if !refined {
            self.bar.println(format!(
                "  {} table {table_id} kept unrefined",
                yellow("⚠")
            ));
        }
    }

    fn on_extraction_complete(&self, _summary: &ExtractionSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract all tables into table_output/tables.json
  pdf2tables rates.pdf

  # A scanned page image, Hindi + English OCR
  pdf2tables scan.png --languages hi,en -o out

  # Pages 7-9 only, no LLM refinement
  pdf2tables --pages 7-9 --reasoning none rates.pdf

  # Refine with Gemini over REST
  GEMINI_API_KEY=... pdf2tables --reasoning gemini rates.pdf

  # Page count only (no models needed)
  pdf2tables --inspect-only rates.pdf

  # Print everything as JSON instead of writing tables.json
  pdf2tables --json rates.pdf > output.json

ENVIRONMENT VARIABLES:
  PDF2TABLES_MODEL_SERVER  Base URL of the layout / table / OCR model server
  OPENAI_API_KEY           OpenAI API key (refinement)
  ANTHROPIC_API_KEY        Anthropic API key (refinement)
  GEMINI_API_KEY           Google Gemini API key (refinement)
  EDGEQUAKE_LLM_PROVIDER   Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL          Override model ID
  PDFIUM_LIB_PATH          Path to libpdfium (file or directory)
"#;

/// Extract tables, including tables split across pages, from PDFs and scans.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2tables",
    version,
    about = "Extract tables from PDFs and scanned images as JSON",
    long_about = "Detect layout, table structure and text on every page, stitch tables that \
continue across page breaks, optionally reconcile them with an LLM, and write \
{table_id, page, headers, rows} objects to tables.json.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF or image path, or HTTP/HTTPS URL.
    input: String,

    /// Directory that receives tables.json.
    #[arg(short, long, env = "PDF2TABLES_OUTPUT_DIR", default_value = "table_output")]
    output_dir: PathBuf,

    /// Base URL of the detection / recognition model server.
    #[arg(long, env = "PDF2TABLES_MODEL_SERVER", default_value = "http://127.0.0.1:8008")]
    model_server: String,

    /// Refinement backend: llm (edgequake-llm provider), gemini (REST), none.
    #[arg(long, env = "PDF2TABLES_REASONING", value_enum, default_value = "llm")]
    reasoning: ReasoningArg,

    /// LLM model ID used for refinement.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Gemini generateContent endpoint (with --reasoning gemini).
    #[arg(long, env = "PDF2TABLES_GEMINI_ENDPOINT")]
    gemini_endpoint: Option<String>,

    /// OCR languages, comma separated.
    #[arg(long, env = "PDF2TABLES_LANGUAGES", default_value = "en", value_delimiter = ',')]
    languages: Vec<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2TABLES_PAGES", default_value = "all")]
    pages: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2TABLES_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "PDF2TABLES_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TABLES_PASSWORD")]
    password: Option<String>,

    /// Pages per layout-detection request.
    #[arg(long, env = "PDF2TABLES_LAYOUT_BATCH", default_value_t = 8)]
    layout_batch: usize,

    /// Pages per table-structure request.
    #[arg(long, env = "PDF2TABLES_TABLE_BATCH", default_value_t = 16)]
    table_batch: usize,

    /// Degraded-mode OCR workers (1–6). Defaults to the number of cores.
    #[arg(long, env = "PDF2TABLES_OCR_WORKERS")]
    ocr_workers: Option<usize>,

    /// Vertical gap in pixels below which fragments are merged.
    #[arg(long, env = "PDF2TABLES_MERGE_GAP", default_value_t = 50.0)]
    merge_gap: f32,

    /// Path to a text file containing a custom refinement system prompt.
    #[arg(long, env = "PDF2TABLES_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per table.
    #[arg(long, env = "PDF2TABLES_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2TABLES_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per table on transport failure.
    #[arg(long, env = "PDF2TABLES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-table refinement timeout in seconds.
    #[arg(long, env = "PDF2TABLES_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Per-request model-server timeout in seconds.
    #[arg(long, env = "PDF2TABLES_MODEL_TIMEOUT", default_value_t = 300)]
    model_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2TABLES_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the full output (tables, refinement outcomes, summary) as JSON.
    #[arg(long, env = "PDF2TABLES_JSON")]
    json: bool,

    /// Print document kind and page count only.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TABLES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TABLES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TABLES_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ReasoningArg {
    Llm,
    Gemini,
    None,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input).await.context("Failed to inspect document")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("File:   {}", cli.input);
            println!("Kind:   {:?}", info.kind);
            println!("Pages:  {}", info.page_count);
        }
        return Ok(());
    }

    // ── Build config and backends ────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let backends = build_backends(&cli, &config)?;

    // ── Run extraction ───────────────────────────────────────────────────
    if cli.json {
        let output = extract(&cli.input, backends, &config)
            .await
            .context("Extraction failed")?;
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    let summary = extract_to_dir(&cli.input, &cli.output_dir, backends, &config)
        .await
        .context("Extraction failed")?;

    if !cli.quiet {
        print_summary(&summary, &cli.output_dir.join("tables.json"));
    }

    Ok(())
}

fn print_summary(summary: &ExtractionSummary, path: &std::path::Path) {
    let degraded = !summary.dropped_ocr_pages.is_empty() || summary.unrefined_tables > 0;
    eprintln!(
        "{}  {} tables  from {}/{} pages  {}ms  →  {}",
        if degraded { cyan("⚠") } else { green("✔") },
        bold(&summary.tables.to_string()),
        summary.processed_pages,
        summary.total_pages,
        summary.total_duration_ms,
        bold(&path.display().to_string()),
    );
    if let Some(page) = summary.ocr_degraded_at {
        eprintln!("   OCR degraded to CPU workers from page {}", page);
    }
    if !summary.dropped_ocr_pages.is_empty() {
        eprintln!(
            "   {} OCR pages dropped: {:?}",
            red(&summary.dropped_ocr_pages.len().to_string()),
            summary.dropped_ocr_pages
        );
    }
    eprintln!(
        "   {} refined  /  {} unrefined  /  {} not sent  {}",
        summary.refined_tables,
        summary.unrefined_tables,
        summary.skipped_refinement,
        dim(&format!(
            "({} fragments, {} skipped)",
            summary.fragments, summary.skipped_fragments
        )),
    );
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .pages(parse_pages(&cli.pages)?)
        .languages(cli.languages.clone())
        .layout_batch_size(cli.layout_batch)
        .table_batch_size(cli.table_batch)
        .merge_gap_px(cli.merge_gap)
        .refine(cli.reasoning != ReasoningArg::None)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .model_timeout_secs(cli.model_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(n) = cli.ocr_workers {
        builder = builder.ocr_workers(n);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Wire the model server and the chosen reasoning service.
fn build_backends(cli: &Cli, config: &ExtractionConfig) -> Result<Backends> {
    let backends = Backends::model_server(&cli.model_server, config.model_timeout_secs)
        .with_context(|| format!("Invalid model server URL '{}'", cli.model_server))?;

    let reasoning: Option<Arc<dyn ReasoningService>> = match cli.reasoning {
        ReasoningArg::None => None,
        ReasoningArg::Llm => Some(Arc::new(
            LlmReasoningService::from_config(config)
                .context("No LLM provider for refinement (use --reasoning none to skip)")?,
        )),
        ReasoningArg::Gemini => Some(Arc::new(
            GeminiReasoningService::from_env(
                cli.gemini_endpoint.as_deref(),
                config.api_timeout_secs,
            )
            .context("Gemini refinement is not configured")?
            .with_temperature(config.temperature),
        )),
    };

    Ok(match reasoning {
        Some(service) => backends.with_reasoning(service),
        None => backends,
    })
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
