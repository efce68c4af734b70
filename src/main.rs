//! Activity Sense CLI
//!
//! Trains the activity classifier and runs it against a Kafka event stream.

use activity_sense::{
    config::{BusConfig, Config},
    core::{run_sanity_check, DatasetBuilder, LabelCodec},
    model::{train_on_set, TrainedClassifier},
    VERSION,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "server")]
use activity_sense::ActivityLabel;

#[derive(Parser)]
#[command(name = "activity-sense")]
#[command(version = VERSION)]
#[command(about = "Recognise phone activity from streaming sensor events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, sanity-check, then classify the live event stream
    Run {
        #[command(flatten)]
        training: TrainingArgs,
    },

    /// Train and sanity-check only
    Check {
        #[command(flatten)]
        training: TrainingArgs,
    },

    /// Record training data for one activity from a phone
    #[cfg(feature = "server")]
    Record {
        /// Activity being performed (idle, inhand, pocketmoving, pocketsitting, running)
        activity: ActivityLabel,

        /// Directory the recording is appended to
        #[arg(long, default_value = "trainingdata")]
        training_dir: PathBuf,

        /// Port to listen on
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Seconds to record once warm-up is over
        #[arg(long, default_value = "60")]
        duration: u64,
    },

    /// Relay phone readings to the raw events topic
    #[cfg(all(feature = "server", feature = "kafka"))]
    Relay {
        /// Port to listen on
        #[arg(long, default_value = "3000")]
        port: u16,
    },

    /// Show configuration
    Config,
}

/// Options shared by commands that train a classifier.
#[derive(Args)]
struct TrainingArgs {
    /// Directory holding train-<label>.csv recordings
    #[arg(long, default_value = "trainingdata")]
    training_dir: PathBuf,

    /// Directory holding test-<label>.csv recordings
    #[arg(long, default_value = "testdata")]
    test_dir: PathBuf,

    /// Override the number of training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the training seed
    #[arg(long)]
    seed: Option<u64>,
}

impl TrainingArgs {
    fn apply(&self, config: &mut Config) {
        config.data.training_dir = self.training_dir.clone();
        config.data.test_dir = self.test_dir.clone();
        if let Some(epochs) = self.epochs {
            config.classifier.epochs = epochs;
        }
        if let Some(seed) = self.seed {
            config.classifier.seed = seed;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { training } => cmd_run(&training),
        Commands::Check { training } => cmd_check(&training),
        #[cfg(feature = "server")]
        Commands::Record {
            activity,
            training_dir,
            port,
            duration,
        } => cmd_record(activity, training_dir, port, duration),
        #[cfg(all(feature = "server", feature = "kafka"))]
        Commands::Relay { port } => cmd_relay(port),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn cmd_run(args: &TrainingArgs) -> Result<()> {
    // Bus settings are checked before any data is read.
    let mut config = Config::with_bus_from_env().context("Kafka configuration is incomplete")?;
    args.apply(&mut config);

    let bus = config
        .bus
        .clone()
        .context("Kafka configuration is incomplete")?;
    println!("Activity Sense v{VERSION}");
    println!("Using Kafka cluster at {}", bus.bootstrap.join(","));
    println!(
        "Reading sensor events from {} and producing predictions to {}",
        bus.raw_topic, bus.processed_topic
    );
    println!();

    let (classifier, codec) = train_and_check(&config)?;
    stream(&bus, &classifier, &codec)
}

fn cmd_check(args: &TrainingArgs) -> Result<()> {
    let mut config = Config::default();
    args.apply(&mut config);

    println!("Activity Sense v{VERSION}");
    println!();

    train_and_check(&config)?;
    Ok(())
}

/// Build the training set, train, and spot-check the result.
fn train_and_check(config: &Config) -> Result<(TrainedClassifier, LabelCodec)> {
    banner("Preparing training data...");
    let set = DatasetBuilder::new(&config.data.training_dir)
        .build()
        .context("Failed to build training data")?;
    for (label, count) in set.label_counts() {
        info!(label = %label, windows = count, "training examples");
    }

    banner("Training ML model...");
    let (classifier, codec, report) =
        train_on_set(&set, &config.classifier).context("Failed to train classifier")?;
    drop(set);
    if let Some(last) = report.final_metrics() {
        println!(
            "Trained {} parameters on {} windows: loss {:.4}, accuracy {:.4}",
            report.parameters, report.windows, last.loss, last.accuracy
        );
    }

    banner("Quick sniff test to verify the ML model...");
    let results = run_sanity_check(&classifier, &codec, &config.data.test_dir)
        .context("Failed to run sanity check")?;
    for result in &results {
        println!("expected   : {}", result.expected);
        println!("prediction : {}", result.predicted);
    }

    Ok((classifier, codec))
}

#[cfg(feature = "kafka")]
fn stream(bus: &BusConfig, classifier: &TrainedClassifier, codec: &LabelCodec) -> Result<()> {
    use activity_sense::bus::{KafkaCollector, KafkaPublisher, TransportError};
    use activity_sense::core::run_stream;
    use activity_sense::stats::create_shared_stats;

    banner("Preparing Kafka producer...");
    let mut publisher =
        KafkaPublisher::processed(bus).context("Failed to connect Kafka producer")?;

    banner("Connecting to Kafka for a stream of events to categorize...");
    let mut collector = KafkaCollector::new(bus.clone());
    let receiver = collector.start().context("Failed to start Kafka consumer")?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    println!("Sending predictions from sensor events");
    println!("Press Ctrl+C to stop");
    println!();

    let stats = create_shared_stats();
    let result = run_stream(classifier, codec, &receiver, &mut publisher, &running, &stats);

    collector.stop();
    println!();
    println!("{}", stats.summary());

    match result {
        Ok(()) => Ok(()),
        Err(TransportError::SourceClosed) => match collector.take_error() {
            Some(cause) => Err(cause).context("Kafka consumer failed"),
            None => Err(TransportError::SourceClosed.into()),
        },
        Err(e) => Err(e).context("Event stream failed"),
    }
}

#[cfg(not(feature = "kafka"))]
fn stream(_bus: &BusConfig, _classifier: &TrainedClassifier, _codec: &LabelCodec) -> Result<()> {
    anyhow::bail!("this build has no Kafka support; rebuild with the `kafka` feature")
}

#[cfg(feature = "server")]
fn cmd_record(activity: ActivityLabel, training_dir: PathBuf, port: u16, duration: u64) -> Result<()> {
    use activity_sense::capture::CsvRecorder;
    use activity_sense::server::{run, ServerConfig};
    use std::time::Duration;

    let capture = Config::default().capture;
    let recorder = CsvRecorder::create(&training_dir, activity, Duration::from_secs(duration))
        .context("Failed to open training file")?;

    println!("========================");
    println!("TRAINING DATA COLLECTION");
    println!("========================");
    println!("Recording {activity} to {}", recorder.path().display());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let server = run(ServerConfig::new(port, capture.record_warmup), Box::new(recorder)).await?;

        tokio::select! {
            _ = server.finished() => {}
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Interrupted, stopping early");
            }
        }

        let status = server.shutdown();
        println!();
        println!(
            "{} samples of {} have been added to the training data file",
            status.stored, activity
        );
        Ok(())
    })
}

#[cfg(all(feature = "server", feature = "kafka"))]
fn cmd_relay(port: u16) -> Result<()> {
    use activity_sense::bus::KafkaPublisher;
    use activity_sense::server::{run, ServerConfig};

    let bus = BusConfig::from_env().context("Kafka configuration is incomplete")?;
    let capture = Config::default().capture;

    println!("==========================");
    println!("SUBMITTING SENSOR READINGS");
    println!("==========================");
    println!("Using Kafka cluster at {}", bus.bootstrap.join(","));
    println!("Producing sensor events to {}", bus.raw_topic);

    let publisher = KafkaPublisher::raw(&bus).context("Failed to connect Kafka producer")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let server = run(ServerConfig::new(port, capture.relay_warmup), Box::new(publisher)).await?;

        tokio::select! {
            _ = server.finished() => {}
            _ = tokio::signal::ctrl_c() => {}
        }

        let status = server.shutdown();
        println!();
        println!("Relayed {} sensor readings", status.stored);
        Ok(())
    })
}

fn cmd_config() {
    let mut config = Config::default();
    match BusConfig::from_env() {
        Ok(bus) => config.bus = Some(bus),
        Err(e) => println!("Note: {e}; bus commands will not start"),
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn banner(title: &str) {
    println!("--------------------------------------------------------------");
    println!(" {title}");
    println!("--------------------------------------------------------------");
}

/// Set up Ctrl+C handler.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
