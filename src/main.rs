use photofind::cli::{Cli, Commands, ConfigAction, FacesAction};
use photofind::config::{Config, ConfigValidator};
use photofind::engine::SearchEngine;
use photofind::error::{PhotofindError, Result};
use photofind::faces::GalleryReport;
use photofind::pipeline::{BatchSummary, CancelFlag};
use photofind::storage::format_size;
use std::path::PathBuf;
use std::process::ExitCode;

/// Batch finished but some images were skipped, failed or never started
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e, PhotofindError::StoreCorruption(_)) {
                eprintln!(
                    "The image store must be rebuilt: remove the store directory and re-index."
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "photofind=debug" } else { "photofind=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings {
        config_path: cli.config,
        data_dir: cli.data_dir,
        profile: cli.profile,
    };

    match cli.command {
        Commands::Index {
            path,
            limit,
            reindex,
            workers,
            json,
        } => cmd_index(&settings, path, limit, reindex, workers, json).await,
        Commands::Search {
            query,
            limit,
            person,
            show_ocr,
            json,
        } => cmd_search(&settings, &query, limit, person, show_ocr, json).await,
        Commands::Faces { action } => cmd_faces(&settings, action).await,
        Commands::Stats { json } => cmd_stats(&settings, json),
        Commands::Inspect { image, json } => cmd_inspect(&settings, image, json).await,
        Commands::Config { action } => cmd_config(&settings, action),
    }
}

/// Global flags that shape the configuration
struct Settings {
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    profile: Option<String>,
}

impl Settings {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Config::default_path(),
        }
    }

    fn load_config(&self) -> Result<Config> {
        let path = self.config_path()?;

        let mut config = if path.exists() {
            match &self.profile {
                Some(profile) => Config::load_with_profile(&path, profile)?,
                None => Config::load(&path)?,
            }
        } else {
            tracing::warn!(
                "Config file not found, using defaults. Run 'photofind config init' to create one."
            );
            let mut config = Config::default();
            config.apply_env_overrides();
            if let Some(profile) = &self.profile {
                config.apply_profile(profile)?;
            }
            config
        };

        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn open_engine(&self) -> Result<SearchEngine> {
        let config = self.load_config()?;
        SearchEngine::open(&config)
    }
}

async fn cmd_index(
    settings: &Settings,
    path: PathBuf,
    limit: Option<usize>,
    reindex: bool,
    workers: Option<usize>,
    json: bool,
) -> Result<ExitCode> {
    let engine = settings.open_engine()?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted: finishing images in flight, not starting new ones...");
                cancel.cancel();
            }
        });
    }

    let result = engine
        .index_path(&path, limit, workers, !reindex, cancel)
        .await;
    engine.close()?;
    let summary = result?;

    if json {
        print_json(&summary, "Failed to serialize batch summary")?;
    } else {
        print_summary(&summary);
    }

    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    })
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "✓ Indexed {} images in {:.1}s",
        summary.succeeded,
        summary.duration_ms as f64 / 1000.0
    );
    if summary.unchanged > 0 {
        println!("  Already indexed: {}", summary.unchanged);
    }
    if summary.degraded > 0 {
        println!("  Missing OCR or face data: {}", summary.degraded);
    }
    if summary.skipped > 0 {
        println!("  Skipped (unreadable): {}", summary.skipped);
    }
    if summary.failed > 0 {
        println!("  Failed (no embedding): {}", summary.failed);
    }
    if summary.cancelled > 0 {
        println!("  Not started (cancelled): {}", summary.cancelled);
    }
    for failure in &summary.failures {
        println!("  ✗ {}: {}", failure.path.display(), failure.reason);
    }
}

async fn cmd_search(
    settings: &Settings,
    query: &str,
    limit: Option<usize>,
    person: Option<String>,
    show_ocr: bool,
    json: bool,
) -> Result<ExitCode> {
    let engine = settings.open_engine()?;
    let limit = limit.unwrap_or(engine.options().default_limit);

    let result = engine.search(query, limit, person.as_deref()).await;
    engine.close()?;
    let hits = result?;

    if json {
        print_json(&hits, "Failed to serialize search results")?;
        return Ok(ExitCode::SUCCESS);
    }

    if hits.is_empty() {
        println!("No results for \"{}\"", query);
        return Ok(ExitCode::SUCCESS);
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!("{:>2}. {:.3}  {}", rank + 1, hit.score, hit.path.display());
        if !hit.faces.is_empty() {
            println!("      People: {}", hit.faces.join(", "));
        }
        if show_ocr && !hit.ocr_text.is_empty() {
            println!("      Text: {}", hit.ocr_text);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_faces(settings: &Settings, action: FacesAction) -> Result<ExitCode> {
    let engine = settings.open_engine()?;

    let result = match action {
        FacesAction::List => engine.list_known().map(|people| {
            if people.is_empty() {
                println!(
                    "No known faces. Add some with \
                     'photofind faces add --name <NAME> --photos <FILES>'"
                );
            } else {
                println!("Known faces ({}):", people.len());
                for person in people {
                    println!("  {} ({} reference photos)", person.name, person.reference_count);
                }
            }
        }),
        FacesAction::Add { name, photos } => engine.add_known(&name, photos).await.map(|report| {
            println!("✓ Updated references for {}", name);
            print_gallery_report(&report);
        }),
        FacesAction::Remove { name } => engine.remove_known(&name).await.map(|removed| {
            if removed {
                println!("✓ Removed {}", name);
            } else {
                println!("{} is not a known face", name);
            }
        }),
        FacesAction::Rebuild { force } => engine.rebuild_gallery(force).await.map(|report| {
            println!("✓ Face gallery rebuilt");
            print_gallery_report(&report);
        }),
    };

    engine.close()?;
    result?;
    Ok(ExitCode::SUCCESS)
}

fn print_gallery_report(report: &GalleryReport) {
    println!(
        "  {} people, {} references ({} computed, {} cached)",
        report.people, report.references, report.embedded, report.reused
    );
    for warning in &report.warnings {
        println!("  ⚠ {}", warning);
    }
}

fn cmd_stats(settings: &Settings, json: bool) -> Result<ExitCode> {
    let engine = settings.open_engine()?;
    let result = engine.stats();
    engine.close()?;
    let stats = result?;

    if json {
        print_json(&stats, "Failed to serialize stats")?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("photofind store");
    println!("===============");
    println!("Images:        {}", stats.store.count);
    println!("With text:     {}", stats.store.with_text);
    println!("Unknown faces: {}", stats.store.unknown_faces);
    println!(
        "Embeddings:    {} ({}D, {} index)",
        stats.embedding_model, stats.store.dimension, stats.store.backend
    );
    println!("Known people:  {}", stats.known_people);
    println!("Database size: {}", format_size(stats.store.db_size_bytes));

    if !stats.store.people.is_empty() {
        println!("\nPhotos per person:");
        for (name, count) in &stats.store.people {
            println!("  {}: {}", name, count);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_inspect(settings: &Settings, image: PathBuf, json: bool) -> Result<ExitCode> {
    let engine = settings.open_engine()?;
    let result = engine.inspect(&image).await;
    engine.close()?;
    let processed = result?;
    let record = &processed.record;

    if json {
        let value = serde_json::json!({
            "id": record.id,
            "path": record.path,
            "dimension": record.embedding.len(),
            "ocr_text": record.ocr_text,
            "faces": record.faces,
            "unknown_faces": record.unknown_faces,
            "searchable_text": record.searchable_text,
            "degraded": processed.degraded.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            "timings_ms": {
                "decode": processed.timings.decode.as_millis() as u64,
                "embedding": processed.timings.embedding.as_millis() as u64,
                "ocr": processed.timings.ocr.as_millis() as u64,
                "faces": processed.timings.faces.as_millis() as u64,
                "total": processed.timings.total.as_millis() as u64,
            },
        });
        print_json(&value, "Failed to serialize inspection")?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", record.path.display());
    println!("  Id:        {}", record.id);
    println!("  Embedding: {} dimensions", record.embedding.len());
    for face in &record.faces {
        println!("  Face:      {} ({:.2})", face.name, face.confidence);
    }
    if record.unknown_faces > 0 {
        println!("  Unknown:   {} faces", record.unknown_faces);
    }
    if !record.ocr_text.is_empty() {
        println!("  Text:      {}", record.ocr_text);
    }
    for degraded in &processed.degraded {
        println!("  ⚠ {}", degraded);
    }
    println!(
        "  Timings:   decode {:?}, embedding {:?}, ocr {:?}, faces {:?}, total {:?}",
        processed.timings.decode,
        processed.timings.embedding,
        processed.timings.ocr,
        processed.timings.faces,
        processed.timings.total
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(settings: &Settings, action: ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            let config = settings.load_config()?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(file) => file,
                None => settings.config_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = settings.config_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(ExitCode::SUCCESS);
            }

            let mut config = Config::default();
            if let Some(data_dir) = &settings.data_dir {
                config.storage.data_dir = data_dir.clone();
            }
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Data directory: {}", config.storage.data_dir.display());
            println!(
                "  Face models:    {}, {}",
                config.faces.detector_model.display(),
                config.faces.recognizer_model.display()
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: serde::Serialize>(value: &T, context: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| PhotofindError::Json {
        source: e,
        context: context.to_string(),
    })?;
    println!("{}", json);
    Ok(())
}
