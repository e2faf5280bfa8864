//! cohort-prep CLI
//!
//! ```bash
//! # Full quality report
//! cohort-prep validate cohort.json --patient-col RID --visit-col EXAMDATE --strict
//!
//! # Training gate; exits non-zero when the dataset is not ready
//! cohort-prep ready cohort.json --config prep.toml
//!
//! # Fit the feature pipeline and persist its state
//! cohort-prep fit cohort.json --patient-col RID --visit-col EXAMDATE --out-dir artifacts/
//!
//! # Reuse a saved state on new data
//! cohort-prep transform new.json --state artifacts/fit_state.json --output features.json
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cohort_prep::{DataValidationEngine, Dataset, FeatureEngineeringPipeline, FitState, PrepConfig};

#[derive(Parser, Debug)]
#[command(name = "cohort-prep", version, about = "Validate clinical cohorts and build model features")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every quality check and print the report as JSON
    Validate {
        /// Dataset JSON file
        data: PathBuf,
        #[arg(long)]
        patient_col: String,
        #[arg(long)]
        visit_col: String,
        /// Zero the score on PHI or visit-sequence failures
        #[arg(long)]
        strict: bool,
        /// Name recorded in the report (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check whether a dataset may be used for model training
    Ready {
        data: PathBuf,
        #[arg(long)]
        patient_col: Option<String>,
        #[arg(long)]
        visit_col: Option<String>,
    },
    /// Fit the feature pipeline, writing features, fit state and documentation
    Fit {
        data: PathBuf,
        #[arg(long)]
        patient_col: String,
        #[arg(long)]
        visit_col: String,
        /// simple or iterative
        #[arg(long)]
        imputation: Option<String>,
        /// standard, minmax or none
        #[arg(long)]
        normalization: Option<String>,
        /// Skip longitudinal features
        #[arg(long)]
        no_temporal: bool,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Transform a dataset with a saved fit state
    Transform {
        data: PathBuf,
        #[arg(long)]
        state: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => PrepConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PrepConfig::default(),
    };

    match cli.command {
        Command::Validate {
            data,
            patient_col,
            visit_col,
            strict,
            name,
            output,
        } => {
            let dataset = read_dataset(&data)?;
            let name = name.unwrap_or_else(|| file_stem(&data));
            let engine = DataValidationEngine::new(config.validation)?;
            let report = engine.validate_dataset(&dataset, &name, &patient_col, &visit_col, strict)?;
            write_json(&report, output.as_deref())?;
            Ok(if report.validation_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Ready {
            data,
            patient_col,
            visit_col,
        } => {
            let dataset = read_dataset(&data)?;
            let mut validation = config.validation;
            if patient_col.is_some() {
                validation.patient_id_col = patient_col;
            }
            if visit_col.is_some() {
                validation.visit_date_col = visit_col;
            }
            let engine = DataValidationEngine::new(validation)?;
            let (is_ready, issues) = engine.validate_for_ml_training(&dataset)?;
            if is_ready {
                println!("ready for training");
                Ok(ExitCode::SUCCESS)
            } else {
                for issue in &issues {
                    println!("{issue}");
                }
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Fit {
            data,
            patient_col,
            visit_col,
            imputation,
            normalization,
            no_temporal,
            out_dir,
        } => {
            let dataset = read_dataset(&data)?;
            let mut pipeline_config = config.pipeline;
            if let Some(imputation) = imputation {
                pipeline_config.imputation_strategy = imputation.parse()?;
            }
            if let Some(normalization) = normalization {
                pipeline_config.normalization_method = normalization.parse()?;
            }
            if no_temporal {
                pipeline_config.include_temporal = false;
            }

            let mut pipeline = FeatureEngineeringPipeline::new(pipeline_config)?;
            let features = pipeline.fit_transform(&dataset, &patient_col, &visit_col)?;
            let Some(state) = pipeline.fit_state() else {
                bail!("pipeline produced no fit state");
            };

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;
            write_json(&features, Some(&out_dir.join("features.json")))?;
            state.save(out_dir.join("fit_state.json"))?;
            pipeline.save_feature_documentation(out_dir.join("feature_report.txt"))?;

            let checks = pipeline.validate_pipeline(&features)?;
            let failed = checks.values().flat_map(|c| c.values()).filter(|ok| !**ok).count();
            tracing::info!(
                rows = features.n_rows(),
                features = features.n_features(),
                failed_checks = failed,
                out_dir = %out_dir.display(),
                "fit complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Transform { data, state, output } => {
            let dataset = read_dataset(&data)?;
            let state = FitState::load(&state)
                .with_context(|| format!("failed to load fit state {}", state.display()))?;
            let pipeline = FeatureEngineeringPipeline::from_fit_state(state);
            let features = pipeline.transform(&dataset)?;
            write_json(&features, output.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let dataset: Dataset = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse dataset {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        rows = dataset.n_rows(),
        columns = dataset.n_columns(),
        "dataset loaded"
    );
    Ok(dataset)
}

fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, value)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}
