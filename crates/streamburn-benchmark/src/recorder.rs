use csv::{Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use streamburn_core::{Result, StreamBurnError, TrialResult};
use tracing::{debug, info};

use crate::controller::{DeviceOutcome, SweepEnd};

pub const CSV_HEADER: [&str; 10] = [
    "Streams",
    "Device",
    "Combined_FPS",
    "Per_Stream_FPS",
    "CPU_pct",
    "Memory_pct",
    "GPU_pct",
    "NPU_pct",
    "Network_Mbps",
    "Bottleneck",
];

pub const CONSOLE_HEADER: &str =
    "Streams  Device  C-FPS  S-FPS  CPU%   MEM%   GPU%   NPU%   NET(Mbps)  Bottleneck";

/// Written in place of an absent GPU/NPU reading.
pub const NOT_AVAILABLE: &str = "N/A";

/// Receives each trial result as soon as the trial completes.
pub trait TrialSink {
    fn record(&mut self, result: &TrialResult) -> Result<()>;

    fn device_finished(&mut self, _outcome: &DeviceOutcome) -> Result<()> {
        Ok(())
    }
}

/// Appends one CSV row per trial and flushes it to disk before returning.
pub struct ResultRecorder {
    writer: Writer<File>,
    path: PathBuf,
    console: bool,
}

impl ResultRecorder {
    /// Open `path` for appending, writing the header only if the file is new
    /// or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(log_write)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_write)?;
        let fresh = file.metadata().map_err(log_write)?.len() == 0;

        let mut recorder = Self {
            writer: WriterBuilder::new().has_headers(false).from_writer(file),
            path,
            console: false,
        };

        if fresh {
            recorder.writer.write_record(CSV_HEADER).map_err(log_write)?;
            recorder.sync()?;
            info!("Created result log {:?}", recorder.path);
        } else {
            info!("Appending to result log {:?}", recorder.path);
        }
        Ok(recorder)
    }

    /// Also print a fixed-width line per trial to stdout.
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn print_console_header(&self) {
        if self.console {
            println!("{}", CONSOLE_HEADER);
            println!("{}", "-".repeat(CONSOLE_HEADER.len()));
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush().map_err(log_write)?;
        self.writer.get_ref().sync_data().map_err(log_write)
    }
}

impl TrialSink for ResultRecorder {
    fn record(&mut self, result: &TrialResult) -> Result<()> {
        self.writer.write_record(csv_row(result)).map_err(log_write)?;
        self.sync()?;
        debug!("Recorded {} streams on {}", result.streams, result.device);

        if self.console {
            println!("{}", console_line(result));
        }
        Ok(())
    }

    fn device_finished(&mut self, outcome: &DeviceOutcome) -> Result<()> {
        if self.console {
            println!("{}", device_summary(outcome));
        }
        Ok(())
    }
}

pub fn csv_row(r: &TrialResult) -> [String; 10] {
    [
        r.streams.to_string(),
        r.device.clone(),
        format!("{:.2}", r.combined_fps),
        format!("{:.2}", r.per_stream_fps),
        format!("{:.1}", r.cpu_percent),
        format!("{:.1}", r.mem_percent),
        optional(r.gpu_percent),
        optional(r.npu_percent),
        format!("{:.1}", r.network_mbps),
        r.bottleneck.label().to_string(),
    ]
}

pub fn console_line(r: &TrialResult) -> String {
    format!(
        "{:>7}  {:>6}  {:6.2}  {:6.2}  {:5.1}  {:5.1}  {:>5}  {:>5}  {:10.1}  {}",
        r.streams,
        r.device,
        r.combined_fps,
        r.per_stream_fps,
        r.cpu_percent,
        r.mem_percent,
        optional(r.gpu_percent),
        optional(r.npu_percent),
        r.network_mbps,
        r.bottleneck,
    )
}

pub fn device_summary(outcome: &DeviceOutcome) -> String {
    let best = match outcome.best_streams {
        Some(n) => format!("{} stream(s) met target", n),
        None => "no stream count met target".to_string(),
    };
    let reason = match &outcome.end {
        SweepEnd::BelowTarget { streams } => format!("per-stream FPS fell below target at {}", streams),
        SweepEnd::CeilingReached => "reached max streams".to_string(),
        SweepEnd::ConstructionFailed { streams, message } => {
            format!("pipeline construction failed at {} streams: {}", streams, message)
        }
        SweepEnd::Cancelled => "cancelled".to_string(),
    };
    format!("  -> {}: {}; {}", outcome.device, best, reason)
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{:.1}", v))
}

fn log_write(err: impl std::fmt::Display) -> StreamBurnError {
    StreamBurnError::LogWrite(err.to_string())
}
