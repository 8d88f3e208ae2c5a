use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use promptlens_core::filter::stat_file;
use promptlens_core::{
    list_images, CancellationToken, DatePreset, FieldToggles, FilterEngine, FilterQuery,
    ImageMetadataRecord, MatchMode, Settings, ThrottledProgress,
};

#[derive(Parser)]
#[command(name = "promptlens", version, about = "Read and search generation prompts embedded in AI images")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "promptlens_core=trace" (RUST_LOG wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the metadata of image files
    Show {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,

        /// Include the extraction trace
        #[arg(long)]
        diagnostics: bool,
    },
    /// List the images in a folder that match a query
    Search(SearchArgs),
    /// Extract the metadata of every image in a folder
    Scan {
        dir: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Print every record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    All,
    Any,
    Exclude,
}

impl From<ModeArg> for MatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::All => MatchMode::All,
            ModeArg::Any => MatchMode::Any,
            ModeArg::Exclude => MatchMode::Exclude,
        }
    }
}

#[derive(Args)]
struct SearchArgs {
    dir: PathBuf,

    /// Comma-separated keywords
    #[arg(short, long, default_value = "")]
    keywords: String,

    #[arg(short, long, value_enum, default_value = "all")]
    mode: ModeArg,

    /// Match keywords against the file name
    #[arg(long)]
    filename: bool,

    /// Match keywords against the prompt
    #[arg(long)]
    prompt: bool,

    /// Match keywords against the negative prompt
    #[arg(long)]
    negative: bool,

    /// Match keywords against the settings
    #[arg(long)]
    settings: bool,

    /// Keywords must match whole words
    #[arg(long)]
    whole_word: bool,

    /// Minimum file size in KB
    #[arg(long)]
    min_kb: Option<u64>,

    /// Maximum file size in KB
    #[arg(long)]
    max_kb: Option<u64>,

    /// Created within the last 7 days
    #[arg(long)]
    this_week: bool,

    /// Created within the last 14 days
    #[arg(long)]
    two_weeks: bool,

    /// Created within the last 28 days
    #[arg(long)]
    four_weeks: bool,

    /// Created within the last 30 days
    #[arg(long)]
    one_month: bool,

    /// Created within the last 365 days
    #[arg(long)]
    one_year: bool,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,
}

impl SearchArgs {
    fn query(&self) -> FilterQuery {
        let mut query = FilterQuery::new()
            .with_keywords(&self.keywords)
            .with_mode(self.mode.into())
            .with_fields(FieldToggles {
                filename: self.filename,
                prompt: self.prompt,
                negative: self.negative,
                settings: self.settings,
            })
            .with_whole_word(self.whole_word)
            .with_size_kb(self.min_kb, self.max_kb);

        let presets = [
            (self.this_week, DatePreset::ThisWeek),
            (self.two_weeks, DatePreset::TwoWeeks),
            (self.four_weeks, DatePreset::FourWeeks),
            (self.one_month, DatePreset::OneMonth),
            (self.one_year, DatePreset::OneYear),
        ];
        for (enabled, preset) in presets {
            if enabled {
                query = query.with_date_preset(preset);
            }
        }
        query
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn progress_bar(label: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {msg}")?);
    pb.set_message(label.to_string());
    Ok(pb)
}

fn cancel_on_ctrlc() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("installing Ctrl-C handler")?;
    Ok(token)
}

fn print_record(record: &ImageMetadataRecord, diagnostics: bool) {
    println!("{}", record.path.display());
    match &record.source_key {
        Some(key) => println!("  container: {} ({key})", record.container),
        None => println!("  container: {}", record.container),
    }
    if !record.has_metadata() {
        println!("  no metadata");
    } else {
        println!("  encoding:  {}", record.encoding);
        println!("  layout:    {}", record.strategy);
        println!("  prompt:    {}", record.prompt);
        println!("  negative:  {}", record.negative_prompt);
        println!("  settings:  {}", record.settings);
    }
    if diagnostics {
        for line in &record.diagnostics {
            println!("  | {line}");
        }
    }
}

fn show(settings: &Settings, files: &[PathBuf], json: bool, diagnostics: bool) -> anyhow::Result<()> {
    let extractor = settings.extractor();
    let mut records = Vec::new();
    for path in files {
        match extractor.extract(path) {
            Ok(mut record) => {
                if !diagnostics {
                    record.diagnostics.clear();
                }
                records.push(record);
            }
            Err(e) => eprintln!("warning: {e}"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            print_record(record, diagnostics);
        }
    }
    Ok(())
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

fn search(settings: &Settings, args: &SearchArgs) -> anyhow::Result<()> {
    let images = list_images(&args.dir, args.recursive || settings.recursive)?;
    let query = args.query();
    debug!(images = images.len(), ?query, "searching");

    let cache = settings.metadata_cache()?;
    let token = cancel_on_ctrlc()?;
    let pb = progress_bar("filtering")?;
    let callback = |_: &str, current: u64, total: u64, _: &str| {
        pb.set_length(total);
        pb.set_position(current + 1);
    };
    let progress = ThrottledProgress::new(&callback);

    let result = FilterEngine::new(&cache).apply_with_control(
        &images,
        &query,
        &stat_file,
        Some(&token),
        &progress,
    )?;
    pb.finish_and_clear();

    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    for path in &result.matched {
        println!("{}", relative_to(path, &args.dir).display());
    }
    info!(matched = result.matched.len(), total = images.len(), "search finished");
    Ok(())
}

fn scan(settings: &Settings, dir: &Path, recursive: bool, json: bool) -> anyhow::Result<()> {
    let t_total = std::time::Instant::now();
    let images = list_images(dir, recursive || settings.recursive)?;

    let cache = settings.metadata_cache()?;
    let token = cancel_on_ctrlc()?;
    let pb = progress_bar("reading metadata")?;
    let callback = |_: &str, current: u64, total: u64, _: &str| {
        pb.set_length(total);
        pb.set_position(current + 1);
    };
    let progress = ThrottledProgress::new(&callback);

    let report = promptlens_core::scan(&images, &cache, Some(&token), &progress)?;
    pb.finish_and_clear();

    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if json {
        let records: Vec<&ImageMetadataRecord> = report.records.iter().map(|r| r.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in report.records.iter().filter(|r| r.has_metadata()) {
            println!("{}: {}", relative_to(&record.path, dir).display(), record.prompt);
        }
    }

    eprintln!(
        "Done! {} images, {} with metadata, {} unreadable ({:.2}s)",
        report.total,
        report.with_metadata,
        report.warnings.len(),
        t_total.elapsed().as_secs_f64()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref().unwrap_or(&settings.log_level));

    match &cli.command {
        Command::Show {
            files,
            json,
            diagnostics,
        } => show(&settings, files, *json, *diagnostics),
        Command::Search(args) => search(&settings, args),
        Command::Scan {
            dir,
            recursive,
            json,
        } => scan(&settings, dir, *recursive, *json),
    }
}
