/// File Readers Module
///
/// Turns a biosignal container into an in-memory [`Recording`]. New formats
/// can be added by implementing the [`FileReader`] trait and registering the
/// extension in [`FileReaderFactory`].
use crate::error::{Result, TopomapError};
use crate::types::{Annotation, ChannelKind, Recording};
use serde::Serialize;
use std::path::Path;

pub mod annotations;
pub mod biosignal;
pub mod channel_classifier;

pub use biosignal::{BiosignalFile, BiosignalWriter, SampleFormat};
pub use channel_classifier::classify_channel_label;

/// Header-level description of a file, available without decoding samples
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub sample_rate: f64,
    pub num_channels: usize,
    pub num_samples: usize,
    pub duration: f64,
    pub channels: Vec<String>,
    pub channel_kinds: Vec<ChannelKind>,
    pub start_time: Option<String>,
    pub num_annotations: usize,
    pub file_type: String,
}

/// Trait that all file readers implement
pub trait FileReader: Send + Sync {
    /// Metadata of the data channels (annotation signals excluded)
    fn metadata(&self) -> Result<FileMetadata>;

    /// Decode the data channels and annotations into a recording
    fn read_recording(&self) -> Result<Recording>;

    /// File format name (e.g., "EDF", "BDF")
    fn format_name(&self) -> &str;
}

/// EDF/EDF+ and BDF/BDF+ reader
pub struct BiosignalFileReader {
    file: BiosignalFile,
    path: String,
}

impl BiosignalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        Ok(Self {
            file: BiosignalFile::open(path)?,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Data signals sharing the reference sampling rate.
    ///
    /// The reference is the rate of the first EEG signal (or of the first data
    /// signal if there is no EEG). Non-EEG signals at another rate are skipped;
    /// an EEG signal at another rate makes the file unsupported.
    fn data_signals(&self) -> Result<(Vec<usize>, f64)> {
        let record_duration = self.file.header.duration_of_data_record;
        let candidates: Vec<(usize, ChannelKind, f64)> = self
            .file
            .signal_headers
            .iter()
            .enumerate()
            .filter(|(_, sh)| !sh.is_annotation())
            .map(|(i, sh)| {
                (
                    i,
                    classify_channel_label(&sh.label),
                    sh.sample_frequency(record_duration),
                )
            })
            .collect();

        let reference = candidates
            .iter()
            .find(|(_, kind, _)| *kind == ChannelKind::Eeg)
            .or_else(|| candidates.first())
            .map(|(_, _, rate)| *rate)
            .ok_or_else(|| {
                TopomapError::UnsupportedFormat("File contains no data signals".to_string())
            })?;

        let mut selected = Vec::with_capacity(candidates.len());
        for (idx, kind, rate) in candidates {
            if (rate - reference).abs() <= f64::EPSILON * reference.max(1.0) {
                selected.push(idx);
            } else if kind == ChannelKind::Eeg {
                return Err(TopomapError::UnsupportedFormat(format!(
                    "EEG signal '{}' sampled at {} Hz, expected {} Hz",
                    self.file.signal_headers[idx].label, rate, reference
                )));
            } else {
                log::warn!(
                    "Skipping {} signal '{}' sampled at {} Hz (recording rate {} Hz)",
                    kind,
                    self.file.signal_headers[idx].label,
                    rate,
                    reference
                );
            }
        }

        Ok((selected, reference))
    }

    fn labels_for(&self, indices: &[usize]) -> Vec<String> {
        dedup_labels(
            indices
                .iter()
                .map(|&i| self.file.signal_headers[i].label.clone())
                .collect(),
        )
    }

    fn start_time(&self) -> Option<String> {
        parse_start_datetime(&self.file.header.start_date, &self.file.header.start_time)
    }
}

impl FileReader for BiosignalFileReader {
    fn metadata(&self) -> Result<FileMetadata> {
        let (indices, sample_rate) = self.data_signals()?;
        let channels = self.labels_for(&indices);
        let channel_kinds = channels
            .iter()
            .map(|l| classify_channel_label(l))
            .collect();
        let num_samples = indices
            .first()
            .map(|&i| self.file.signal_headers[i].num_samples_per_record * self.file.num_records())
            .unwrap_or(0);

        Ok(FileMetadata {
            file_path: self.path.clone(),
            file_name: Path::new(&self.path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string(),
            file_size: std::fs::metadata(&self.path)?.len(),
            sample_rate,
            num_channels: indices.len(),
            num_samples,
            duration: self.file.total_duration(),
            channels,
            channel_kinds,
            start_time: self.start_time(),
            num_annotations: self.file.read_annotations().len(),
            file_type: self.format_name().to_string(),
        })
    }

    fn read_recording(&self) -> Result<Recording> {
        let (indices, sample_rate) = self.data_signals()?;
        let labels = self.labels_for(&indices);
        let data = self.file.read_physical_signals(&indices)?;
        let annotations: Vec<Annotation> = self.file.read_annotations();

        log::info!(
            "Loaded {} channels at {} Hz ({:.1}s, {} annotations) from {}",
            labels.len(),
            sample_rate,
            self.file.total_duration(),
            annotations.len(),
            self.path
        );

        Ok(Recording::new(labels, sample_rate, data)?
            .with_annotations(annotations)
            .with_start_time(self.start_time()))
    }

    fn format_name(&self) -> &str {
        self.file.header.format.name()
    }
}

/// Factory for creating file readers based on file extension
pub struct FileReaderFactory;

impl FileReaderFactory {
    pub fn create_reader(path: &Path) -> Result<Box<dyn FileReader>> {
        if !path.exists() {
            return Err(TopomapError::FileReadError(format!(
                "Input file not found: {}",
                path.display()
            )));
        }
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension.to_lowercase().as_str() {
            "edf" | "bdf" => Ok(Box::new(BiosignalFileReader::new(path)?)),
            _ => Err(TopomapError::UnsupportedFormat(format!(
                "Unsupported file extension '{}'. Supported: {}",
                extension,
                Self::supported_extensions().join(", ")
            ))),
        }
    }

    pub fn supported_extensions() -> Vec<&'static str> {
        vec!["edf", "bdf"]
    }

    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| Self::supported_extensions().contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// Open `path` and decode it. The file is closed before this returns.
pub fn load_recording(path: &Path) -> Result<Recording> {
    let reader = FileReaderFactory::create_reader(path)?;
    reader.read_recording()
}

/// Make repeated labels unique by suffixing `-1`, `-2`, ... to later occurrences.
fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        if !out.contains(&label) {
            out.push(label);
            continue;
        }
        let mut n = 1;
        while out.contains(&format!("{}-{}", label, n)) {
            n += 1;
        }
        log::warn!("Duplicate channel label '{}' renamed to '{}-{}'", label, label, n);
        out.push(format!("{}-{}", label, n));
    }
    out
}

/// Parse EDF `dd.mm.yy` / `hh.mm.ss` header fields into RFC 3339.
///
/// Two-digit years 85-99 are 19xx, everything else 20xx.
pub fn parse_start_datetime(date: &str, time: &str) -> Option<String> {
    let d: Vec<u32> = date.split('.').map(|p| p.trim().parse().ok()).collect::<Option<_>>()?;
    let t: Vec<u32> = time.split('.').map(|p| p.trim().parse().ok()).collect::<Option<_>>()?;
    if d.len() != 3 || t.len() != 3 {
        return None;
    }
    let year = (if d[2] >= 85 { 1900 + d[2] } else { 2000 + d[2] }) as i32;
    let date = chrono::NaiveDate::from_ymd_opt(year, d[1], d[0])?;
    let time = chrono::NaiveTime::from_hms_opt(t[0], t[1], t[2])?;
    Some(chrono::NaiveDateTime::new(date, time).and_utc().to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(FileReaderFactory::is_supported(Path::new("rec.bdf")));
        assert!(FileReaderFactory::is_supported(Path::new("rec.EDF")));
        assert!(!FileReaderFactory::is_supported(Path::new("rec.fif")));
        assert!(!FileReaderFactory::is_supported(Path::new("rec")));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_recording(Path::new("/nonexistent/rec.bdf")).err().unwrap();
        assert!(matches!(err, TopomapError::FileReadError(_)));
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let tmp = tempfile::Builder::new().suffix(".xyz").tempfile().unwrap();
        let err = load_recording(tmp.path()).err().unwrap();
        assert!(matches!(err, TopomapError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_parse_start_datetime() {
        assert_eq!(
            parse_start_datetime("17.03.21", "09.30.05").as_deref(),
            Some("2021-03-17T09:30:05+00:00")
        );
        assert_eq!(
            parse_start_datetime("01.01.99", "00.00.00").as_deref(),
            Some("1999-01-01T00:00:00+00:00")
        );
        assert!(parse_start_datetime("32.01.21", "00.00.00").is_none());
        assert!(parse_start_datetime("garbage", "00.00.00").is_none());
    }

    #[test]
    fn test_dedup_labels() {
        let labels = vec!["A1".to_string(), "A1".to_string(), "B".to_string(), "A1".to_string()];
        assert_eq!(dedup_labels(labels), vec!["A1", "A1-1", "B", "A1-2"]);
    }

    #[test]
    fn test_read_edf_with_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotated.edf");
        let labels = vec!["Fp1".to_string(), "Cz".to_string()];
        let data = vec![vec![1.0; 400], (0..400).map(|i| i as f64).collect()];
        let anns = vec![Annotation::bad(1.0, 0.5)];
        BiosignalWriter::new(SampleFormat::Edf16)
            .write(&path, &labels, 100.0, &data, &anns)
            .unwrap();

        let reader = FileReaderFactory::create_reader(&path).unwrap();
        assert_eq!(reader.format_name(), "EDF");
        let meta = reader.metadata().unwrap();
        assert_eq!(meta.channels, labels);
        assert_eq!(meta.num_samples, 400);
        assert_eq!(meta.num_annotations, 1);
        assert_eq!(meta.start_time.as_deref(), Some("2024-01-01T00:00:00+00:00"));

        let rec = reader.read_recording().unwrap();
        assert_eq!(rec.sample_rate(), 100.0);
        assert_eq!(rec.annotations(), &anns[..]);
        assert!((rec.channel_data("Cz").unwrap()[399] - 399.0).abs() < 0.01);
    }
}
