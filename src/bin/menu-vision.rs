//! CLI binary for menu-vision.
//!
//! A thin shim over the library crate: `extract` and `inspect` map flags to
//! `ExtractionConfig`, `serve` starts the browser UI.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use menu_vision::{
    extract_menu, inspect, ApiKey, CellEdit, ExtractionConfig, ExtractionProgressCallback,
    ImageSelection, PricePairing, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

/// Live progress bar with one log line per finished image.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
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
        bar.set_message("Rendering menu…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, image: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&image))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_images: usize) {
        self.bar.set_length(total_images as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_images} image(s)…"))
        ));
    }

    fn on_image_start(&self, image: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(image, Instant::now());
        }
        self.bar.set_message(format!("image_{image}.jpg"));
    }

    fn on_image_complete(&self, image: usize, _total: usize, item_count: usize) {
        self.bar.println(format!(
            "  {} Image {:>3}  {:<10}  {}",
            green("✓"),
            image,
            dim(&format!("{item_count:>3} items")),
            dim(&format!("{:.1}s", self.elapsed_secs(image))),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, image: usize, _total: usize, error: String) {
        let msg = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error
        };
        self.bar.println(format!(
            "  {} Image {:>3}  {}  {}",
            red("✗"),
            image,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs(image))),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_images: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_images.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} image(s) processed", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} image(s) processed  ({} failed)",
                if failed == total_images { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_images,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a PDF menu into ./out/menu_items.json and ./out/menu_items.csv
  menu-vision extract menu.pdf -o out

  # Only pages 1 and 3, fix a cell before the CSV is written
  menu-vision extract menu.pdf --images 1,3 --edit "2:Price (Full)=180"

  # A photo from the web
  menu-vision extract https://example.com/menu.jpg

  # See what a file rasterises to (no API key needed)
  menu-vision inspect menu.pdf --save-images pages/

  # Browser UI on http://127.0.0.1:8501
  menu-vision serve

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           Key for the OpenAI-compatible backend
  MENU_VISION_API_BASE     Base URL of the OpenAI-compatible API
  MENU_VISION_MODEL        Vision model ID (default gpt-4o)
  MENU_VISION_PROVIDER     edgequake-llm provider used when no key is given
  MENU_VISION_WORKSPACE    Directory for per-session image folders
  PDFIUM_LIB_PATH          Path to libpdfium or its directory
  RUST_LOG                 Log filter, e.g. menu_vision=debug
"#;

/// Extract restaurant menu items from PDFs and photos with a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "menu-vision",
    version,
    about = "Extract restaurant menu items from PDFs and photos with a vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MENU_VISION_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MENU_VISION_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract menu items and write menu_items.json and menu_items.csv.
    Extract(ExtractArgs),
    /// Rasterise a menu and list its pages without calling a model.
    Inspect(InspectArgs),
    /// Serve the browser UI.
    Serve(ServeArgs),
}

/// Settings shared by every command that touches the model or the rasteriser.
#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Vision model ID.
    #[arg(long, env = "MENU_VISION_MODEL")]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "MENU_VISION_API_BASE", default_value = menu_vision::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Retries per image on transient model errors.
    #[arg(long, env = "MENU_VISION_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-image model call timeout in seconds.
    #[arg(long, env = "MENU_VISION_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Longest edge of a rendered PDF page, in pixels.
    #[arg(long, env = "MENU_VISION_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// What to do with items whose prices and price labels differ in length.
    #[arg(long, env = "MENU_VISION_PRICE_PAIRING", value_enum, default_value = "strict")]
    price_pairing: PairingArg,

    /// Directory that holds per-session image folders.
    #[arg(long, env = "MENU_VISION_WORKSPACE")]
    workspace: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Local PDF/JPEG/PNG path or HTTP/HTTPS URL.
    input: String,

    /// Directory for menu_items.json and menu_items.csv.
    #[arg(short, long, env = "MENU_VISION_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// API key for the OpenAI-compatible backend.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// edgequake-llm provider to use when no API key is given.
    #[arg(long, env = "MENU_VISION_PROVIDER")]
    provider: Option<String>,

    /// Images to process: all, 3, 1-4 or 1,3,5.
    #[arg(long, env = "MENU_VISION_IMAGES", default_value = "all")]
    images: String,

    /// Edit a table cell before the CSV export: ROW:COLUMN=VALUE (row is 1-based).
    #[arg(long = "edit", value_name = "ROW:COLUMN=VALUE")]
    edits: Vec<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "MENU_VISION_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "MENU_VISION_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max model output tokens per image.
    #[arg(long, env = "MENU_VISION_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "MENU_VISION_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MENU_VISION_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the run (per-image results and stats) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "MENU_VISION_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Local PDF/JPEG/PNG path or HTTP/HTTPS URL.
    input: String,

    /// Also write the pages as image_<n>.jpg into this directory.
    #[arg(long)]
    save_images: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "MENU_VISION_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "MENU_VISION_ADDR", default_value = "127.0.0.1:8501")]
    addr: SocketAddr,

    /// End browser sessions idle for this many minutes and delete their images.
    #[arg(long, env = "MENU_VISION_SESSION_IDLE_MINS", default_value_t = 30)]
    session_idle_mins: u64,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PairingArg {
    Strict,
    Truncate,
}

impl From<PairingArg> for PricePairing {
    fn from(v: PairingArg) -> Self {
        match v {
            PairingArg::Strict => PricePairing::Strict,
            PairingArg::Truncate => PricePairing::Truncate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `extract`.
    let progress_active = matches!(
        &cli.command,
        Command::Extract(args) if !args.no_progress && !args.json
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || progress_active {
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

    match cli.command {
        Command::Extract(args) => run_extract(args, progress_active, cli.quiet).await,
        Command::Inspect(args) => run_inspect(args).await,
        Command::Serve(args) => {
            let config = common_builder(&args.common)
                .build()
                .context("Invalid configuration")?;
            let idle = std::time::Duration::from_secs(args.session_idle_mins.max(1) * 60);
            menu_vision::server::serve(args.addr, config, idle)
                .await
                .context("Server failed")
        }
    }
}

async fn run_extract(args: ExtractArgs, show_progress: bool, quiet: bool) -> Result<()> {
    // Validate edits before spending any tokens.
    let edits = args
        .edits
        .iter()
        .map(|e| CellEdit::parse(e))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --edit")?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_extract_config(&args, progress).await?;
    let api_key = args.api_key.as_deref().and_then(ApiKey::new);

    let output = extract_menu(&args.input, api_key, &config)
        .await
        .context("Extraction failed")?;

    for warning in output.warnings() {
        if !quiet {
            eprintln!("{} {}", cyan("⚠"), warning);
        }
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    }

    if output.is_empty() {
        if !quiet {
            eprintln!("{} No menu items found; nothing exported.", cyan("⚠"));
        }
        return Ok(());
    }

    let mut document = output.to_document();
    for edit in &edits {
        edit.apply(document.table_mut())
            .with_context(|| format!("Cannot apply edit {}:{}", edit.row, edit.column))?;
    }

    let (json_path, csv_path) = document
        .write_to_dir(&args.output)
        .await
        .context("Export failed")?;

    if !quiet {
        eprintln!(
            "{}  {} items  {}ms  →  {}, {}",
            if output.stats.failed_images == 0 { green("✔") } else { cyan("⚠") },
            output.stats.total_items,
            output.stats.total_duration_ms,
            bold(&json_path.display().to_string()),
            bold(&csv_path.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
        );
    }
    Ok(())
}

async fn run_inspect(args: InspectArgs) -> Result<()> {
    let mut builder = common_builder(&args.common);
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    let preview = inspect(&args.input, args.save_images.as_deref(), &config)
        .await
        .context("Failed to inspect menu")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&preview).context("Failed to serialise preview")?
        );
        return Ok(());
    }

    println!("File:    {}", preview.file_name);
    println!("Type:    {}", preview.mime_type);
    println!("Images:  {}", preview.pages.len());
    for page in &preview.pages {
        match page.path {
            Some(ref path) => println!(
                "  Image {:>3}  {}x{}  {}",
                page.index,
                page.width,
                page.height,
                path.display()
            ),
            None => println!("  Image {:>3}  {}x{}", page.index, page.width, page.height),
        }
    }
    Ok(())
}

fn common_builder(common: &CommonArgs) -> menu_vision::ExtractionConfigBuilder {
    let mut builder = ExtractionConfig::builder()
        .api_base_url(common.api_base.clone())
        .max_retries(common.max_retries)
        .api_timeout_secs(common.api_timeout)
        .max_rendered_pixels(common.max_pixels)
        .price_pairing(common.price_pairing.clone().into());
    if let Some(ref model) = common.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref root) = common.workspace {
        builder = builder.workspace_root(root.clone());
    }
    builder
}

/// Map `extract` flags to `ExtractionConfig`.
async fn build_extract_config(
    args: &ExtractArgs,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let images = ImageSelection::parse(&args.images).context("Invalid --images")?;

    let mut builder = common_builder(&args.common)
        .images(images)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .download_timeout_secs(args.download_timeout);

    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
