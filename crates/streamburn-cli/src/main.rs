use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use streamburn_benchmark::{
    resolve_model_arg, GstLaunchEngine, ModelStore, PipelineEngine, ResourceSampler,
    ResultRecorder, SimulatedEngine, SweepController, SystemMetrics, TrialRunner,
};
use streamburn_core::{EngineKind, PipelineTemplate, SweepConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamburn")]
#[command(about = "StreamBurn - Media Pipeline Load Scaling Benchmark", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add streams per device until per-stream FPS drops below target
    Sweep(SweepArgs),

    /// Show a single resource snapshot
    Status {
        /// Interface for network sampling
        #[arg(long, default_value = "lo")]
        net_interface: String,
    },

    /// Resolve model names to IR files, downloading missing ones
    Models {
        /// Model names, e.g. person-detection-retail-0013
        #[arg(required = true)]
        names: Vec<String>,

        /// Model directory
        #[arg(long, default_value = "models")]
        models_dir: PathBuf,

        /// Model precision
        #[arg(long, default_value = "FP32")]
        precision: String,

        /// Open Model Zoo downloader.py
        #[arg(long)]
        downloader: Option<PathBuf>,

        /// Open Model Zoo checkout to search for downloader.py
        #[arg(long)]
        omz_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    Gst,
    Simulated,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Gst => EngineKind::Gst,
            EngineArg::Simulated => EngineKind::Simulated,
        }
    }
}

#[derive(Args)]
struct SweepArgs {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated devices to sweep [default: CPU,GPU,NPU]
    #[arg(long, value_delimiter = ',')]
    devices: Option<Vec<String>>,

    /// Stream-count increment [default: 2]
    #[arg(long)]
    step: Option<u32>,

    /// Max concurrent streams per device [default: 10]
    #[arg(long)]
    max_streams: Option<u32>,

    /// Seconds per trial [default: 20]
    #[arg(long)]
    duration: Option<u64>,

    /// Stop adding streams once per-stream FPS falls below this [default: 15.0]
    #[arg(long)]
    target_fps: Option<f64>,

    /// CSV file to append results to [default: benchmark_results.csv]
    #[arg(long)]
    output: Option<PathBuf>,

    /// Media source, e.g. rtsp://127.0.0.1:8554/test
    #[arg(long)]
    source: Option<String>,

    /// Detection model IR path or model name
    #[arg(long)]
    detection_model: Option<String>,

    /// Classification model IR path or model name
    #[arg(long)]
    classification_model: Option<String>,

    /// Interface for network sampling [default: lo]
    #[arg(long)]
    net_interface: Option<String>,

    /// Per-stream teardown limit in milliseconds [default: 5000]
    #[arg(long)]
    stop_timeout_ms: Option<u64>,

    /// Pipeline engine [default: gst]
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,

    /// Directory for named models [default: models]
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Open Model Zoo downloader.py for missing models
    #[arg(long)]
    downloader: Option<PathBuf>,
}

impl SweepArgs {
    fn into_config(self) -> Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => SweepConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SweepConfig::default(),
        };
        config.apply_env();

        if let Some(devices) = self.devices {
            config.devices = devices.into_iter().map(|d| d.trim().to_string()).collect();
        }
        if let Some(v) = self.step {
            config.step = v;
        }
        if let Some(v) = self.max_streams {
            config.max_streams = v;
        }
        if let Some(v) = self.duration {
            config.duration_secs = v;
        }
        if let Some(v) = self.target_fps {
            config.target_fps = v;
        }
        if let Some(v) = self.output {
            config.output = v;
        }
        if let Some(v) = self.net_interface {
            config.net_interface = v;
        }
        if let Some(v) = self.stop_timeout_ms {
            config.stop_timeout_ms = v;
        }
        if let Some(v) = self.engine {
            config.engine = v.into();
        }
        if let Some(v) = self.models_dir {
            config.models.dir = v;
        }
        if self.downloader.is_some() {
            config.models.downloader = self.downloader;
        }
        config.source = self.source.or(config.source);
        config.detection_model = self.detection_model.or(config.detection_model);
        config.classification_model = self.classification_model.or(config.classification_model);

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep(args) => {
            let config = args.into_config()?;
            let run_id = uuid::Uuid::new_v4();
            cmd_sweep(config)
                .instrument(tracing::info_span!("run", %run_id))
                .await?
        }
        Commands::Status { net_interface } => cmd_status(&net_interface).await,
        Commands::Models {
            names,
            models_dir,
            precision,
            downloader,
            omz_dir,
        } => {
            let downloader = downloader.or_else(|| omz_dir.and_then(|dir| ModelStore::locate_downloader(dir)));
            let store = ModelStore::new(models_dir, precision).with_downloader(downloader);
            cmd_models(&store, &names).await
        }
    }

    Ok(())
}

async fn cmd_sweep(config: SweepConfig) -> Result<()> {
    let template = pipeline_template(&config).await?;
    let engine: Arc<dyn PipelineEngine> = match config.engine {
        EngineKind::Gst => Arc::new(GstLaunchEngine::default()),
        EngineKind::Simulated => Arc::new(
            SimulatedEngine::new(config.simulated.base_fps, config.simulated.contention)
                .with_max_instances(config.simulated.max_instances),
        ),
    };

    let runner = TrialRunner::new(engine, config.stop_timeout());
    let sampler = ResourceSampler::new(Box::new(SystemMetrics::detect()), &config.net_interface);
    let mut controller =
        SweepController::new(runner, sampler, config.policy(), config.duration(), template);
    let mut recorder = ResultRecorder::open(&config.output)?.with_console(true);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after current trial teardown");
            on_signal.cancel();
        }
    });

    println!();
    println!("Running sweep...");
    println!("  Devices:     {}", config.devices.join(", "));
    println!("  Streams:     1..={} step {}", config.max_streams, config.step);
    println!("  Duration:    {}s per trial", config.duration_secs);
    println!("  Target:      {:.1} fps/stream", config.target_fps);
    println!();
    recorder.print_console_header();

    let report = controller.run(&config.devices, &mut recorder, &cancel).await?;

    if report.cancelled {
        println!();
        println!("Sweep cancelled; {} trial(s) recorded", report.trial_count());
    }
    info!("Run complete");
    println!();
    println!("Results appended to {}", recorder.path().display());
    Ok(())
}

async fn pipeline_template(config: &SweepConfig) -> Result<PipelineTemplate> {
    if config.engine == EngineKind::Simulated {
        return Ok(PipelineTemplate {
            source: config.source.clone().unwrap_or_else(|| "simulated".to_string()),
            detection_model: config.detection_model.clone().unwrap_or_default().into(),
            classification_model: config.classification_model.clone().unwrap_or_default().into(),
        });
    }

    let store = ModelStore::new(&config.models.dir, &config.models.precision)
        .with_downloader(config.models.downloader.clone());
    let (Some(source), Some(detection), Some(classification)) = (
        &config.source,
        &config.detection_model,
        &config.classification_model,
    ) else {
        anyhow::bail!("source and both models are required for the gst engine");
    };

    Ok(PipelineTemplate {
        source: source.clone(),
        detection_model: resolve_model_arg(&store, detection).await?,
        classification_model: resolve_model_arg(&store, classification).await?,
    })
}

async fn cmd_status(net_interface: &str) {
    let mut sampler = ResourceSampler::new(Box::new(SystemMetrics::detect()), net_interface);
    let snapshot = sampler.settled_sample().await;
    let fmt_opt = |v: Option<f64>| v.map_or_else(|| "N/A".to_string(), |v| format!("{:.1}%", v));

    println!("System Status:");
    println!("{:-<40}", "");
    println!("  CPU:        {:.1}%", snapshot.cpu_percent);
    println!("  Memory:     {:.1}%", snapshot.mem_percent);
    println!("  GPU:        {}", fmt_opt(snapshot.gpu_percent));
    println!("  NPU:        {}", fmt_opt(snapshot.npu_percent));
    println!("  Net RX:     {} bytes ({})", snapshot.net_bytes_received, sampler.interface());
    println!("  Bottleneck: {}", snapshot.bottleneck());
}

async fn cmd_models(store: &ModelStore, names: &[String]) {
    println!();
    for name in names {
        match store.resolve(name).await {
            Ok(path) => println!("  {:<40} {}", name, path.display()),
            Err(e) => println!("  {:<40} error: {}", name, e),
        }
    }
    println!();
}
