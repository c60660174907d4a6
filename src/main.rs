use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use cardio_risk::config::TrainingConfig;
use cardio_risk::inference::{InferenceService, Prediction};
use cardio_risk::metrics::{accuracy, ClassificationReport};
use cardio_risk::records::{self, ClinicalRecord, LABEL};
use cardio_risk::selection::ModelSelector;
use cardio_risk::CardioError;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{debug, info, warn, LevelFilter};
use polars::prelude::{NamedFrom, Series};
use serde::Serialize;
use sysinfo::{ProcessExt, System, SystemExt};

#[tokio::main]
async fn main() -> Result<(), CardioError> {
    let cli = CardioArgs::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let env = Env::new().filter("CARDIO_LOG");
    Builder::new().filter(Some("cardio_risk"), log_level).parse_env(env).init();

    debug!("Arguments {:#?}", cli);

    match cli.command {
        Command::Train { data, model, config, report } => {
            train(&data, &model, config.as_deref(), report.as_deref()).await
        }
        Command::Predict { model, record, input, output, json } => {
            let service = InferenceService::load(&model)?;
            match input {
                Some(input) => {
                    let output = output.unwrap_or_else(|| input.with_extension("scored.csv"));
                    predict_batch(&service, &input, &output).await
                }
                None => predict_one(&service, &ClinicalRecord::from(record), json),
            }
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Coronary heart disease risk model", long_about = None)]
#[clap(propagate_version = true)]
pub struct CardioArgs {
    #[clap(short, long, global = true, parse(from_occurrences), help = "Verbose level")]
    verbose: usize,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the best candidate pipeline and store it as an artifact
    Train {
        #[clap(short, long, parse(from_os_str), help = "Training CSV (';' delimited)")]
        data: PathBuf,
        #[clap(short, long, parse(from_os_str), default_value = "model.json", help = "Artifact path")]
        model: PathBuf,
        #[clap(short, long, parse(from_os_str), help = "Training config (JSON)")]
        config: Option<PathBuf>,
        #[clap(short, long, parse(from_os_str), help = "Write the selection report (JSON)")]
        report: Option<PathBuf>,
    },
    /// Score one record given on the command line, or a whole CSV
    Predict {
        #[clap(short, long, parse(from_os_str), default_value = "model.json", help = "Artifact path")]
        model: PathBuf,
        #[clap(flatten)]
        record: RecordArgs,
        #[clap(short, long, parse(from_os_str), help = "Batch of records to score")]
        input: Option<PathBuf>,
        #[clap(short, long, parse(from_os_str), requires = "input",
        help = "Scored output, .csv or .parquet")]
        output: Option<PathBuf>,
        #[clap(long, parse(from_flag), help = "Print the prediction as JSON")]
        json: bool,
    },
}

/// Features of a single request. Omitted values are imputed like any other
/// missing value.
#[derive(clap::Args, Debug)]
struct RecordArgs {
    #[clap(long, conflicts_with = "input", help = "Systolic blood pressure")]
    sbp: Option<f64>,
    #[clap(long, conflicts_with = "input", help = "Low-density lipoprotein cholesterol")]
    ldl: Option<f64>,
    #[clap(long, conflicts_with = "input")]
    adiposity: Option<f64>,
    #[clap(long, conflicts_with = "input", help = "Family history, Present or Absent")]
    famhist: Option<String>,
    #[clap(long, conflicts_with = "input")]
    obesity: Option<f64>,
    #[clap(long, conflicts_with = "input")]
    age: Option<f64>,
}

impl From<RecordArgs> for ClinicalRecord {
    fn from(args: RecordArgs) -> Self {
        ClinicalRecord {
            sbp: args.sbp,
            ldl: args.ldl,
            adiposity: args.adiposity,
            famhist: args.famhist,
            obesity: args.obesity,
            age: args.age,
        }
    }
}

#[derive(Serialize)]
struct PredictionOutput {
    label: i32,
    probabilities: [f64; 2],
    risk_band: String,
}

/// Resident memory of this process in bytes.
fn monitor_memory(sys: &mut System) -> u64 {
    match sysinfo::get_current_pid() {
        Ok(pid) => {
            sys.refresh_process(pid);
            sys.process(pid).map(|p| p.memory()).unwrap_or(0)
        }
        Err(e) => {
            warn!("cannot read process memory: {e}");
            0
        }
    }
}

async fn train(
    data: &Path,
    model: &Path,
    config: Option<&Path>,
    report: Option<&Path>,
) -> Result<(), CardioError> {
    let mut sys = System::new();
    let start_time = Instant::now();
    let start_memory = monitor_memory(&mut sys);

    let config = match config {
        Some(path) => TrainingConfig::from_path(path)?,
        None => TrainingConfig::default(),
    };
    let (df, y) = records::read_training_csv(data).await?;
    info!("training on {} rows from {}", df.height(), data.display());

    let selector = ModelSelector::new(config)?;
    let (selection, artifact) = selector.train(&df, &y).await?;
    artifact.save(model)?;

    if let Some(path) = report {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &selection.summary())?;
        info!("selection report written to {}", path.display());
    }

    let end_memory = monitor_memory(&mut sys);
    info!("training finished in {:?}", start_time.elapsed());
    info!(
        "resident memory {} KiB (started at {} KiB)",
        end_memory / 1024,
        start_memory / 1024
    );
    Ok(())
}

fn predict_one(service: &InferenceService, record: &ClinicalRecord, json: bool) -> Result<(), CardioError> {
    let prediction = service.predict_record(record)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prediction_output(&prediction))?);
    } else {
        let verdict = if prediction.label == 1 { "CHD predicted" } else { "no CHD predicted" };
        println!(
            "{verdict}: P(chd) = {:.1} % ({} risk)",
            prediction.disease_probability() * 100.0,
            prediction.risk_band()
        );
    }
    Ok(())
}

fn prediction_output(prediction: &Prediction) -> PredictionOutput {
    PredictionOutput {
        label: prediction.label,
        probabilities: prediction.probabilities,
        risk_band: prediction.risk_band().to_string(),
    }
}

async fn predict_batch(service: &InferenceService, input: &Path, output: &Path) -> Result<(), CardioError> {
    let mut df = records::read_csv(input).await?;
    let has_label = df.get_column_names().contains(&LABEL);
    let truth = if has_label {
        records::labels(&df)
            .map_err(|e| warn!("{LABEL} column present but not usable for scoring: {e}"))
            .ok()
    } else {
        None
    };
    let features = if has_label { df.drop(LABEL)? } else { df.clone() };

    let predictions = service.predict_frame(&features)?;
    let labels: Vec<i32> = predictions.iter().map(|p| p.label).collect();
    if let Some(truth) = &truth {
        info!("accuracy against {}: {:.4}", LABEL, accuracy(truth, &labels));
        debug!("{}", ClassificationReport::new(truth, &labels));
    }

    df.with_column(Series::new("prediction", &labels))?;
    df.with_column(Series::new(
        "proba_0",
        predictions.iter().map(|p| p.probabilities[0]).collect::<Vec<f64>>(),
    ))?;
    df.with_column(Series::new(
        "proba_1",
        predictions.iter().map(|p| p.probabilities[1]).collect::<Vec<f64>>(),
    ))?;

    match output.extension().and_then(|e| e.to_str()) {
        Some("parquet") => records::write_parquet(output, &mut df).await?,
        _ => records::write_csv(output, &mut df).await?,
    }
    info!("{} scored rows written to {}", df.height(), output.display());
    Ok(())
}
