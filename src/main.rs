//! CLI entry point for chartcoder.
//!
//! Provides commands for building the cluster index from an ICD-10 catalog,
//! assigning codes to note text and inspecting the active index.

use std::fs::OpenOptions;
use std::io::{BufRead, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};

use chartcoder::config::CONFIG_DIR;
use chartcoder::display::{self, THEME};
use chartcoder::{
    Catalog, CodingEngine, CodingError, JsonLinesSink, Linkage, Match, Settings, logging,
};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic ICD-10 code assignment
#[derive(Parser)]
#[command(
    name = "chartcoder",
    version = env!("CARGO_PKG_VERSION"),
    about = "Semantic ICD-10 code assignment",
    long_about = "Cluster an ICD-10 catalog into semantic indexes and assign the best code to clinical note text.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ chartcoder init\n  $ chartcoder build icd10.csv\n  $ chartcoder assign \"Patient reports recurrent migraines\""
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the .chartcoder directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Embed and cluster a catalog, then publish a new index generation
    #[command(
        after_help = "Examples:\n  chartcoder build icd10.csv\n  chartcoder build icd10.json --k-min 20 --k-max 60 --k-step 5"
    )]
    Build {
        /// Catalog file (.csv or .json)
        catalog: PathBuf,

        /// Smallest cluster count to try (overrides config)
        #[arg(long)]
        k_min: Option<usize>,

        /// Largest cluster count to try (overrides config)
        #[arg(long)]
        k_max: Option<usize>,

        /// Step between tried cluster counts (overrides config)
        #[arg(long)]
        k_step: Option<usize>,

        /// Linkage criterion: ward, average, complete or single
        #[arg(long)]
        linkage: Option<Linkage>,
    },

    /// Assign the best code to each note
    #[command(
        after_help = "Examples:\n  chartcoder assign \"Patient reports recurrent migraines\"\n  cat notes.txt | chartcoder assign --stdin --json\n  chartcoder assign \"new onset seizure\" --candidates"
    )]
    Assign {
        /// Note texts
        #[arg(num_args = 0..)]
        notes: Vec<String>,

        /// Also read notes from stdin, one per line
        #[arg(long)]
        stdin: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Show the top code of every cluster instead of only the winner
        #[arg(long)]
        candidates: bool,

        /// Append matches as JSON lines to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the active index: manifest and clusters
    Inspect {
        /// List the codes of each cluster
        #[arg(long)]
        members: bool,

        /// Verify the index was built from this catalog
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(&error);
            ExitCode::FAILURE
        }
    }
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<CodingError>() {
        Some(coding) => {
            eprintln!("{}", THEME.error_with_icon(&coding.to_string()));
            eprintln!("  status: {}", coding.status_code());
            for suggestion in coding.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        None => eprintln!("{}", THEME.error_with_icon(&format!("{error:#}"))),
    }
}

fn load_settings(config: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match config {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow::anyhow!("loading configuration from {}: {e}", path.display())
        })?,
        None => {
            if let Err(warning) = Settings::check_init() {
                tracing::debug!("{warning}; using default configuration");
            }
            Settings::load().map_err(|e| anyhow::anyhow!("loading configuration: {e}"))?
        }
    };
    Ok(settings)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init { force } = cli.command {
        logging::init("info", cli.verbose);
        let path = PathBuf::from(CONFIG_DIR).join("settings.toml");
        Settings::init_config_file(force)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Edit this file to customize your settings.");
        return Ok(());
    }

    let mut settings = load_settings(cli.config.as_deref())?;
    logging::init(&settings.logging.level, cli.verbose || settings.debug);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Config => {
            settings.validate()?;
            println!("{}", THEME.apply(&THEME.header, "Current Configuration:"));
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Build {
            catalog,
            k_min,
            k_max,
            k_step,
            linkage,
        } => {
            if let Some(k) = k_min {
                settings.clustering.k_min = k;
            }
            if let Some(k) = k_max {
                settings.clustering.k_max = k;
            }
            if let Some(step) = k_step {
                settings.clustering.k_step = step;
            }
            if let Some(linkage) = linkage {
                settings.clustering.linkage = linkage;
            }
            build(settings, &catalog)
        }
        Commands::Assign {
            notes,
            stdin,
            json,
            candidates,
            output,
        } => {
            let notes = collect_notes(notes, stdin)?;
            let engine = CodingEngine::open(settings)?;
            if candidates {
                show_candidates(&engine, &notes, json)
            } else {
                assign(&engine, &notes, json, output.as_deref())
            }
        }
        Commands::Inspect {
            members,
            catalog,
            json,
        } => inspect(settings, members, catalog.as_deref(), json),
    }
}

fn build(settings: Settings, catalog_path: &Path) -> anyhow::Result<()> {
    let catalog = Catalog::load(catalog_path)?;
    let engine = CodingEngine::open(settings)?;

    let message = format!(
        "Clustering {} codes with {}",
        catalog.len(),
        engine.generator().model_name()
    );
    let report = display::with_spinner(&message, || engine.build_catalog_index(&catalog))?;

    println!("{}", display::create_build_table(&report));
    println!(
        "{}",
        THEME.success_with_icon(&format!(
            "Indexed {} codes into {} clusters (silhouette {:.4}) in {:.2?}",
            report.manifest.code_count, report.result.k, report.result.silhouette, report.elapsed
        ))
    );
    println!(
        "  generation: {}",
        THEME.apply(&THEME.path, report.generation.display())
    );

    engine.close();
    Ok(())
}

fn collect_notes(mut notes: Vec<String>, stdin: bool) -> anyhow::Result<Vec<String>> {
    if stdin {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("reading notes from stdin")?;
            if !line.trim().is_empty() {
                notes.push(line);
            }
        }
    }
    if notes.is_empty() {
        bail!("no notes given; pass note text as arguments or use --stdin");
    }
    Ok(notes)
}

fn assign(
    engine: &CodingEngine,
    notes: &[String],
    json: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let texts: Vec<&str> = notes.iter().map(String::as_str).collect();

    let results = match output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            let mut sink = JsonLinesSink::new(BufWriter::new(file));
            engine.assign_many_and_record(&texts, &mut sink)
        }
        None => engine.assign_many(&texts),
    };

    let mut matches: Vec<Match> = Vec::with_capacity(results.len());
    let mut failures: Vec<CodingError> = Vec::new();
    for (text, result) in texts.iter().zip(results) {
        match result {
            Ok(assignment) => matches.push(assignment),
            Err(e) => {
                eprintln!(
                    "{}",
                    THEME.warning_with_icon(&format!("{} ({}): {e}", preview(text), e.status_code()))
                );
                failures.push(e);
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
    } else if !matches.is_empty() {
        println!("{}", display::create_assignment_table(&matches));
    }

    match failures.len() {
        0 => Ok(()),
        n if n == texts.len() => match failures.pop() {
            // every note failed the same way, e.g. no index yet
            Some(last) => Err(last.into()),
            None => Ok(()),
        },
        n => bail!("{n} of {} notes could not be assigned", texts.len()),
    }
}

fn show_candidates(engine: &CodingEngine, notes: &[String], json: bool) -> anyhow::Result<()> {
    let margin = engine.settings().search.ambiguity_margin;

    if json {
        let mut all = Vec::with_capacity(notes.len());
        for note in notes {
            all.push(serde_json::json!({
                "source_id": chartcoder::note_source_id(note),
                "candidates": engine.candidates(note)?,
            }));
        }
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    for note in notes {
        let candidates = engine.candidates(note)?;
        println!("{}", THEME.apply(&THEME.header, preview(note)));
        println!("{}", display::create_candidate_table(&candidates, margin));
    }
    Ok(())
}

fn inspect(
    settings: Settings,
    members: bool,
    catalog: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = CodingEngine::open(settings)?;
    let manifest = engine.manifest()?;
    let summaries = engine.summaries()?;

    if let Some(path) = catalog {
        let catalog = Catalog::load(path)?;
        engine.check_catalog(&catalog)?;
    }

    if json {
        let value = serde_json::json!({
            "manifest": manifest,
            "clusters": summaries,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let generation = engine.store().current_generation()?;
    let overview = display::TableBuilder::new()
        .set_headers(vec!["Property", "Value"])
        .add_row(vec!["Model".to_string(), manifest.model_name.clone()])
        .add_row(vec!["Dimension".to_string(), manifest.dimension.to_string()])
        .add_row(vec!["Linkage".to_string(), manifest.linkage.to_string()])
        .add_row(vec!["Clusters".to_string(), manifest.k.to_string()])
        .add_row(vec![
            "Silhouette".to_string(),
            format!("{:.4}", manifest.silhouette),
        ])
        .add_row(vec!["Codes".to_string(), manifest.code_count.to_string()])
        .add_row(vec![
            "Catalog".to_string(),
            manifest.catalog_fingerprint.clone(),
        ])
        .add_row(vec!["Created".to_string(), manifest.created_at.to_rfc3339()])
        .add_row(vec![
            "Generation".to_string(),
            generation
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
        ])
        .build();

    println!("{overview}");
    println!("{}", display::create_cluster_table(&summaries, members));
    if catalog.is_some() {
        println!("{}", THEME.success_with_icon("Index matches the catalog"));
    }
    Ok(())
}

fn preview(text: &str) -> String {
    const MAX: usize = 60;
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= MAX {
        single_line
    } else {
        let cut: String = single_line.chars().take(MAX).collect();
        format!("{cut}...")
    }
}
