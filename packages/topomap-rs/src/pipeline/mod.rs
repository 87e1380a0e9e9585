// Pipeline orchestrator - drives one recording through every stage
//
// Stages run strictly in order:
// - Loading: decode the file (or take the in-memory recording), keep channels of the analysed type
// - QualityCheck: flag flat channels (variance and provisional-spectrum heuristics)
// - LayoutResolve: attach montage positions to the usable channels
// - SpectralEstimate: Welch PSD of usable channels, bad annotations rejected
// - BandAggregate: band means, optional normalisation and dB
// - Render: one interpolated panel per band
//
// Every transition is reported to the attached observers. Cancellation is
// checked before each stage.

use crate::bands::{aggregate_bands, check_band_coverage, AggregateOptions, BandPowerMap};
use crate::config::TopomapConfig;
use crate::error::{ErrorKind, TopomapError};
use crate::file_readers::load_recording;
use crate::layout::{resolve_layout, Montage, SpatialLayout};
use crate::profile_scope;
use crate::profiling::{StageTiming, TimingLog};
use crate::quality::{ChannelQualityDetector, ChannelQualityMask, ChannelStatus, FlagReason};
use crate::render::{RenderOptions, RenderResult, TopomapRenderer};
use crate::spectral::{estimate_psd, Spectrum};
use crate::types::{Recording, RecordingSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod session;

pub use session::{RunHandle, TopomapSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Loading,
    QualityCheck,
    LayoutResolve,
    SpectralEstimate,
    BandAggregate,
    Render,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Loading => "loading",
            Stage::QualityCheck => "quality_check",
            Stage::LayoutResolve => "layout_resolve",
            Stage::SpectralEstimate => "spectral_estimate",
            Stage::BandAggregate => "band_aggregate",
            Stage::Render => "render",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress notification emitted while a run advances
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Stage { stage: Stage, message: String },
    Done,
    Failed { stage: Stage, kind: ErrorKind, error: String },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineEvent::Stage { .. })
    }

    /// Human-readable one-line status.
    pub fn status_text(&self) -> String {
        match self {
            PipelineEvent::Stage { message, .. } => message.clone(),
            PipelineEvent::Done => "Done".to_string(),
            PipelineEvent::Failed { stage, error, .. } => format!("Failed during {}: {}", stage, error),
        }
    }
}

/// Receives pipeline events in emission order
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event)
    }
}

impl ProgressObserver for tokio::sync::mpsc::UnboundedSender<PipelineEvent> {
    fn on_event(&self, event: &PipelineEvent) {
        // A dropped receiver means nobody is listening any more
        let _ = self.send(event.clone());
    }
}

impl ProgressObserver for std::sync::mpsc::Sender<PipelineEvent> {
    fn on_event(&self, event: &PipelineEvent) {
        let _ = self.send(event.clone());
    }
}

/// Adapts a plain text status callback
pub struct StatusLine<F>(pub F);

impl<F> ProgressObserver for StatusLine<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        (self.0)(&event.status_text())
    }
}

/// Where the recording of a run comes from
#[derive(Debug, Clone)]
pub enum RecordingSource {
    Path(PathBuf),
    InMemory(Recording),
}

impl fmt::Display for RecordingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingSource::Path(path) => write!(f, "{}", path.display()),
            RecordingSource::InMemory(rec) => write!(f, "in-memory recording ({} channels)", rec.num_channels()),
        }
    }
}

impl From<PathBuf> for RecordingSource {
    fn from(path: PathBuf) -> Self {
        RecordingSource::Path(path)
    }
}

impl From<Recording> for RecordingSource {
    fn from(recording: Recording) -> Self {
        RecordingSource::InMemory(recording)
    }
}

/// A failed run: the stage that was active and what went wrong
#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: TopomapError,
}

impl PipelineFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: String,
    pub recording_summary: RecordingSummary,
    pub mask: ChannelQualityMask,
    pub layout: SpatialLayout,
    pub spectrum: Spectrum,
    pub band_powers: BandPowerMap,
    pub render: RenderResult,
    pub timings: Vec<StageTiming>,
}

impl PipelineOutput {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            recording: self.recording_summary.clone(),
            channels: self.mask.channels().to_vec(),
            unmapped: self.layout.unmapped().to_vec(),
            frequency_resolution: match self.spectrum.freqs() {
                [a, b, ..] => b - a,
                _ => 0.0,
            },
            band_powers: self.band_powers.clone(),
            bounds: self
                .render
                .panels()
                .iter()
                .map(|p| (p.band().name.clone(), p.bounds()))
                .collect(),
            unit: self.render.unit().to_string(),
            timings: self.timings.clone(),
        }
    }
}

/// Serializable digest of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub recording: RecordingSummary,
    pub channels: Vec<ChannelStatus>,
    pub unmapped: Vec<String>,
    pub frequency_resolution: f64,
    pub band_powers: BandPowerMap,
    pub bounds: Vec<(String, (f64, f64))>,
    pub unit: String,
    pub timings: Vec<StageTiming>,
}

pub struct Pipeline {
    config: TopomapConfig,
    montage: Option<Montage>,
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl Pipeline {
    pub fn new(config: TopomapConfig) -> Self {
        Self {
            config,
            montage: None,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Use a custom layout instead of the configured montage name.
    pub fn with_montage(mut self, montage: Montage) -> Self {
        self.montage = Some(montage);
        self
    }

    pub fn config(&self) -> &TopomapConfig {
        &self.config
    }

    /// Run every stage on `source`. The terminal event is always the last one emitted.
    pub fn run(
        &self,
        source: RecordingSource,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineFailure> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let timings = TimingLog::new();
        let mut stage = Stage::Idle;
        log::info!("Starting topomap run {} on {}", run_id, source);

        let result = {
            profile_scope!(timings, "total");
            self.execute(source, cancel, &mut stage, &timings)
        };

        match result {
            Ok(mut output) => {
                output.run_id = run_id;
                output.timings = timings.entries();
                self.emit(&PipelineEvent::Done);
                log::info!("Run {} finished", output.run_id);
                Ok(output)
            }
            Err(error) => {
                log::error!("Run {} failed during {}: {}", run_id, stage, error);
                self.emit(&PipelineEvent::Failed {
                    stage,
                    kind: error.kind(),
                    error: error.to_string(),
                });
                Err(PipelineFailure { stage, error })
            }
        }
    }

    fn emit(&self, event: &PipelineEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }

    fn enter(
        &self,
        next: Stage,
        message: &str,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> crate::Result<()> {
        if cancel.is_cancelled() {
            log::info!("Cancellation requested before {}", next);
            return Err(TopomapError::Cancelled);
        }
        *stage = next;
        log::info!("[{}] {}", next, message);
        self.emit(&PipelineEvent::Stage {
            stage: next,
            message: message.to_string(),
        });
        Ok(())
    }

    fn execute(
        &self,
        source: RecordingSource,
        cancel: &CancellationToken,
        stage: &mut Stage,
        timings: &TimingLog,
    ) -> crate::Result<PipelineOutput> {
        let config = &self.config;
        config.validate()?;
        let render_options = RenderOptions::from_config(config)?;
        let kind = config.channel_type;

        self.enter(Stage::Loading, "Loading recording...", cancel, stage)?;
        let mut recording = {
            profile_scope!(timings, "loading");
            let recording = match source {
                RecordingSource::Path(path) => load_recording(&path)?,
                RecordingSource::InMemory(recording) => recording,
            };
            let picked = recording.channels_of_kind(kind);
            if picked.is_empty() {
                log::warn!("Recording has no {} channels", kind);
                return Err(TopomapError::NoUsableChannels { flagged: Vec::new() });
            }
            log::info!(
                "Selected {} of {} channels of type {}",
                picked.len(),
                recording.num_channels(),
                kind
            );

            // Bands are checked against the bin grid as soon as the rate is known.
            // An empty grid is left for the spectral stage to report.
            let freqs: Vec<f64> = config
                .welch
                .frequency_bins(recording.sample_rate(), config.fmin(), config.fmax())
                .into_iter()
                .map(|(_, f)| f)
                .collect();
            if !freqs.is_empty() {
                check_band_coverage(&freqs, &config.bands)?;
            }
            recording.pick(&picked)
        };

        self.enter(Stage::QualityCheck, "Detecting bad channels...", cancel, stage)?;
        let mut mask = {
            profile_scope!(timings, "quality_check");
            ChannelQualityDetector::new(config.empty_channel_threshold, config.welch.clone())
                .detect(&mut recording, kind)?
        };

        self.enter(Stage::LayoutResolve, "Resolving electrode positions...", cancel, stage)?;
        let layout = {
            profile_scope!(timings, "layout_resolve");
            let montage = match &self.montage {
                Some(custom) => custom.clone(),
                None => config.montage.montage(),
            };
            resolve_layout(&mask.usable(), &montage)
        };

        self.enter(
            Stage::SpectralEstimate,
            "Computing power spectral density...",
            cancel,
            stage,
        )?;
        let spectrum = {
            profile_scope!(timings, "spectral_estimate");
            loop {
                let spectrum = estimate_psd(
                    &recording,
                    &mask.usable(),
                    config.fmin(),
                    config.fmax(),
                    &config.welch,
                    config.reject_by_annotation,
                )?;
                if spectrum.exhausted().is_empty() {
                    break spectrum;
                }

                let exhausted = spectrum.exhausted().to_vec();
                for label in &exhausted {
                    recording.mark_bad(label);
                }
                mask = mask.with_flagged(&exhausted, FlagReason::FullyAnnotated);
                if mask.usable().is_empty() {
                    return Err(TopomapError::NoUsableChannels {
                        flagged: mask.flagged(),
                    });
                }
                log::warn!(
                    "Re-estimating without fully annotated channels: {}",
                    exhausted.join(", ")
                );
            }
        };

        self.enter(Stage::BandAggregate, "Computing band power...", cancel, stage)?;
        let band_powers = {
            profile_scope!(timings, "band_aggregate");
            aggregate_bands(
                &spectrum,
                &config.bands,
                &AggregateOptions {
                    normalize: config.normalize,
                    db_scale: config.db_scale,
                    ..Default::default()
                },
            )?
        };

        self.enter(Stage::Render, "Rendering topographic maps...", cancel, stage)?;
        let render = {
            profile_scope!(timings, "render");
            TopomapRenderer::new(render_options).render(&layout, &band_powers)?
        };

        *stage = Stage::Done;
        Ok(PipelineOutput {
            run_id: String::new(),
            recording_summary: recording.summary(),
            mask,
            layout,
            spectrum,
            band_powers,
            render,
            timings: Vec::new(),
        })
    }
}
