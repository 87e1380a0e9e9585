use std::f64::consts::PI;
use std::path::Path;
use topomap_rs::file_readers::{BiosignalWriter, SampleFormat};
use topomap_rs::{
    Annotation, ChannelKind, ErrorKind, FlagReason, Pipeline, PipelineEvent, Recording,
    RecordingSource, Stage, TopomapConfig,
};
use tokio_util::sync::CancellationToken;

const FS: f64 = 256.0;

fn sine(seconds: f64, freq: f64, amplitude: f64) -> Vec<f64> {
    let n = (FS * seconds) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * PI * freq * i as f64 / FS).sin())
        .collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn fast_config() -> TopomapConfig {
    let mut config = TopomapConfig::default();
    config.render.resolution = 24;
    config.render.dpi = 50;
    config
}

/// Four channels, 10 s at 256 Hz: a 10 Hz unit sine everywhere except a flat third channel.
fn four_channel_recording() -> Recording {
    Recording::new(
        labels(&["Fz", "C3", "Cz", "C4"]),
        FS,
        vec![
            sine(10.0, 10.0, 1.0),
            sine(10.0, 10.0, 1.0),
            vec![0.0; 2560],
            sine(10.0, 10.0, 1.0),
        ],
    )
    .unwrap()
}

// =============================================================================
// END TO END
// =============================================================================

#[test]
fn test_flat_channel_flagged_and_alpha_dominant() {
    init_logging();
    let output = Pipeline::new(fast_config())
        .run(four_channel_recording().into(), &CancellationToken::new())
        .unwrap();

    assert_eq!(output.mask.flagged(), vec!["Cz"]);
    assert_eq!(output.mask.reasons("Cz"), &[FlagReason::LowVariance, FlagReason::ZeroSpectrum]);
    for label in ["Fz", "C3", "C4"] {
        assert_eq!(output.band_powers.dominant_band(label), Some("alpha"), "{}", label);
    }
    assert!(output.band_powers.value("alpha", "Cz").is_none());
    assert_eq!(output.render.panels().len(), 5);
    assert_eq!(output.spectrum.freqs().first(), Some(&1.0));
    assert_eq!(output.spectrum.freqs().last(), Some(&40.0));
}

#[test]
fn test_unknown_labels_fail_in_render() {
    let recording = Recording::new(
        labels(&["EXG1", "EXG2"]),
        FS,
        vec![sine(4.0, 10.0, 1.0), sine(4.0, 12.0, 1.0)],
    )
    .unwrap();

    let events = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = events.clone();
    let failure = Pipeline::new(fast_config())
        .with_observer(move |e: &PipelineEvent| sink.lock().push(e.clone()))
        .run(recording.into(), &CancellationToken::new())
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Render);
    assert_eq!(failure.kind(), ErrorKind::Render);
    let events = events.lock();
    assert!(events.contains(&PipelineEvent::Stage {
        stage: Stage::Render,
        message: "Rendering topographic maps...".to_string(),
    }));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::Failed { stage: Stage::Render, kind: ErrorKind::Render, .. })
    ));
}

#[test]
fn test_shared_scale_bounds_identical_across_panels() {
    let mut config = fast_config();
    config.color_scale = topomap_rs::ColorScale::Shared;
    let output = Pipeline::new(config)
        .run(four_channel_recording().into(), &CancellationToken::new())
        .unwrap();
    let bounds = output.render.bounds();
    assert!(bounds.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_rerun_gives_identical_bounds() {
    let pipeline = Pipeline::new(fast_config());
    let a = pipeline
        .run(four_channel_recording().into(), &CancellationToken::new())
        .unwrap();
    let b = pipeline
        .run(four_channel_recording().into(), &CancellationToken::new())
        .unwrap();
    assert_eq!(a.render.bounds(), b.render.bounds());
    assert_ne!(a.run_id, b.run_id);
}

#[test]
fn test_all_channels_flat() {
    let recording = Recording::new(
        labels(&["Fz", "Cz"]),
        FS,
        vec![vec![0.0; 1024], vec![0.0; 1024]],
    )
    .unwrap();
    let failure = Pipeline::new(fast_config())
        .run(recording.into(), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(failure.stage, Stage::QualityCheck);
    match failure.error {
        topomap_rs::TopomapError::NoUsableChannels { flagged } => {
            assert_eq!(flagged, vec!["Fz", "Cz"]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_normalized_linear_values_sum_below_one() {
    let mut config = fast_config();
    config.normalize = true;
    config.db_scale = false;
    let output = Pipeline::new(config)
        .run(four_channel_recording().into(), &CancellationToken::new())
        .unwrap();
    let alpha = output.band_powers.value("alpha", "Fz").unwrap();
    assert!(alpha > 0.0 && alpha <= 1.0);
    assert_eq!(output.render.unit(), "relative power");
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

#[test]
fn test_bad_annotation_excludes_artifact() {
    // A large 30 Hz burst during the first 4 s, marked bad
    let mut fz = sine(10.0, 10.0, 1.0);
    for (i, x) in fz.iter_mut().take(1024).enumerate() {
        *x += 50.0 * (2.0 * PI * 30.0 * i as f64 / FS).sin();
    }
    let build = |annotations: Vec<Annotation>| {
        Recording::new(labels(&["Fz", "Pz"]), FS, vec![fz.clone(), sine(10.0, 10.0, 1.0)])
            .unwrap()
            .with_annotations(annotations)
    };

    let config = fast_config();
    let clean = Pipeline::new(config.clone())
        .run(build(vec![Annotation::bad(0.0, 4.5)]).into(), &CancellationToken::new())
        .unwrap();
    let raw = Pipeline::new(config)
        .run(build(vec![]).into(), &CancellationToken::new())
        .unwrap();

    assert_eq!(clean.band_powers.dominant_band("Fz"), Some("alpha"));
    assert_eq!(raw.band_powers.dominant_band("Fz"), Some("gamma"));
    assert!(clean.spectrum.n_segments("Fz").unwrap() < raw.spectrum.n_segments("Fz").unwrap());
}

#[test]
fn test_annotations_ignored_when_rejection_disabled() {
    let recording = four_channel_recording().with_annotations(vec![Annotation::bad(0.0, 10.0)]);
    let mut config = fast_config();
    config.reject_by_annotation = false;
    let output = Pipeline::new(config)
        .run(recording.into(), &CancellationToken::new())
        .unwrap();
    assert_eq!(output.mask.flagged(), vec!["Cz"]);
}

#[test]
fn test_every_channel_fully_annotated() {
    let recording = four_channel_recording().with_annotations(vec![Annotation::bad(0.0, 10.0)]);
    let failure = Pipeline::new(fast_config())
        .run(recording.into(), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(failure.stage, Stage::SpectralEstimate);
    assert_eq!(failure.kind(), ErrorKind::NoUsableChannels);
}

// =============================================================================
// FILES
// =============================================================================

fn write_bdf(path: &Path) {
    let names = labels(&["Fp1", "Fp2", "C3", "C4", "O1", "O2", "Status"]);
    let mut data: Vec<Vec<f64>> = (0..6).map(|i| sine(8.0, 10.0, 20.0 + i as f64)).collect();
    data[3] = vec![0.0; 2048];
    data.push(vec![0.0; 2048]);
    BiosignalWriter::new(SampleFormat::Bdf24)
        .write(path, &names, FS, &data, &[Annotation::new(2.0, 0.0, "eyes closed")])
        .unwrap();
}

#[test]
fn test_bdf_file_end_to_end() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.bdf");
    write_bdf(&path);

    let output = Pipeline::new(fast_config())
        .run(RecordingSource::Path(path), &CancellationToken::new())
        .unwrap();

    assert!(!output.recording_summary.channels.contains(&"Status".to_string()));
    assert!(output.recording_summary.channel_kinds.iter().all(|k| *k == ChannelKind::Eeg));
    assert_eq!(output.mask.flagged(), vec!["C4"]);
    assert_eq!(output.layout.len(), 5);
    assert_eq!(output.recording_summary.num_annotations, 1);

    let png = dir.path().join("session-topomap.png");
    output.render.save(&png).unwrap();
    assert!(png.metadata().unwrap().len() > 0);
}

#[test]
fn test_missing_file_fails_in_loading() {
    let failure = Pipeline::new(fast_config())
        .run(
            RecordingSource::Path("/nonexistent/recording.bdf".into()),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(failure.stage, Stage::Loading);
    assert_eq!(failure.kind(), ErrorKind::FileRead);
}
