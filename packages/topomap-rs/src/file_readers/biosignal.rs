// EDF / BDF (European Data Format, BioSemi 24-bit variant) reader and writer
// Specification: https://www.edfplus.info/specs/edf.html

use super::annotations::{encode_tal_record, parse_tal_record};
use super::channel_classifier::is_annotation_channel;
use crate::error::{Result, TopomapError};
use crate::types::Annotation;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const MAIN_HEADER_BYTES: usize = 256;
const SIGNAL_HEADER_BYTES: usize = 256;
const BDF_VERSION: &[u8; 8] = b"\xffBIOSEMI";

/// On-disk sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// EDF / EDF+: 16-bit little-endian two's complement
    Edf16,
    /// BDF / BDF+: 24-bit little-endian two's complement
    Bdf24,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Edf16 => 2,
            SampleFormat::Bdf24 => 3,
        }
    }

    pub fn digital_range(&self) -> (i64, i64) {
        match self {
            SampleFormat::Edf16 => (-32768, 32767),
            SampleFormat::Bdf24 => (-8_388_608, 8_388_607),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::Edf16 => "EDF",
            SampleFormat::Bdf24 => "BDF",
        }
    }

    #[inline]
    fn decode(&self, bytes: &[u8]) -> i32 {
        match self {
            SampleFormat::Edf16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
            SampleFormat::Bdf24 => {
                (((bytes[2] as i32) << 24) | ((bytes[1] as i32) << 16) | ((bytes[0] as i32) << 8))
                    >> 8
            }
        }
    }

    fn encode(&self, value: i32, out: &mut Vec<u8>) {
        let le = value.to_le_bytes();
        out.extend_from_slice(&le[..self.bytes_per_sample()]);
    }
}

#[derive(Debug, Clone)]
pub struct BiosignalHeader {
    pub format: SampleFormat,
    pub patient_id: String,           // 80 bytes: local patient identification
    pub recording_id: String,         // 80 bytes: local recording identification
    pub start_date: String,           // 8 bytes: startdate of recording (dd.mm.yy)
    pub start_time: String,           // 8 bytes: starttime of recording (hh.mm.ss)
    pub header_bytes: usize,          // 8 bytes: number of bytes in header record
    pub reserved: String,             // 44 bytes: "EDF+C", "24BIT", ...
    pub num_data_records: i64,        // 8 bytes: number of data records (-1 if unknown)
    pub duration_of_data_record: f64, // 8 bytes: duration of a data record, in seconds
    pub num_signals: usize,           // 4 bytes: number of signals (channels)
}

#[derive(Debug, Clone)]
pub struct SignalHeader {
    pub label: String,                 // 16 bytes: label (e.g. EEG Fpz-Cz)
    pub transducer_type: String,       // 80 bytes: transducer type
    pub physical_dimension: String,    // 8 bytes: physical dimension (e.g. uV)
    pub physical_minimum: f64,         // 8 bytes
    pub physical_maximum: f64,         // 8 bytes
    pub digital_minimum: i64,          // 8 bytes
    pub digital_maximum: i64,          // 8 bytes
    pub prefiltering: String,          // 80 bytes
    pub num_samples_per_record: usize, // 8 bytes
    pub reserved: String,              // 32 bytes
}

impl SignalHeader {
    pub fn sample_frequency(&self, record_duration: f64) -> f64 {
        self.num_samples_per_record as f64 / record_duration
    }

    pub fn gain(&self) -> f64 {
        (self.physical_maximum - self.physical_minimum)
            / (self.digital_maximum - self.digital_minimum) as f64
    }

    pub fn offset(&self) -> f64 {
        self.physical_maximum - self.gain() * self.digital_maximum as f64
    }

    pub fn is_annotation(&self) -> bool {
        is_annotation_channel(&self.label)
    }
}

/// Sequential reader over a fixed-width ASCII header
struct HeaderCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn raw(&mut self, size: usize) -> Result<&'a [u8]> {
        let end = self.pos + size;
        if end > self.bytes.len() {
            return Err(TopomapError::FileReadError(format!(
                "Header truncated at byte {} (file has {} bytes)",
                self.pos,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn string(&mut self, size: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.raw(size)?).trim().to_string())
    }

    fn number<T: std::str::FromStr>(&mut self, size: usize, field: &str) -> Result<T> {
        let s = self.string(size)?;
        s.parse::<T>().map_err(|_| {
            TopomapError::UnsupportedFormat(format!("Invalid {} '{}'", field, s))
        })
    }

    fn strings(&mut self, count: usize, size: usize) -> Result<Vec<String>> {
        (0..count).map(|_| self.string(size)).collect()
    }

    fn numbers<T: std::str::FromStr>(&mut self, count: usize, size: usize, field: &str) -> Result<Vec<T>> {
        (0..count).map(|_| self.number(size, field)).collect()
    }
}

/// Memory-mapped EDF/BDF file
///
/// The mapping (and the underlying file handle) is released when the reader
/// is dropped.
pub struct BiosignalFile {
    mmap: Mmap,
    pub header: BiosignalHeader,
    pub signal_headers: Vec<SignalHeader>,
    num_records: usize,
    record_bytes: usize,
    signal_offsets: Vec<usize>,
}

impl BiosignalFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            TopomapError::FileReadError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            TopomapError::FileReadError(format!("Failed to map {}: {}", path.display(), e))
        })?;

        let (header, signal_headers) = Self::parse_headers(&mmap)?;

        let bps = header.format.bytes_per_sample();
        let mut signal_offsets = Vec::with_capacity(signal_headers.len());
        let oversized = || {
            TopomapError::UnsupportedFormat(
                "Header declares a data size larger than addressable memory".to_string(),
            )
        };
        let mut record_bytes = 0usize;
        for sh in &signal_headers {
            signal_offsets.push(record_bytes);
            record_bytes = sh
                .num_samples_per_record
                .checked_mul(bps)
                .and_then(|bytes| record_bytes.checked_add(bytes))
                .ok_or_else(oversized)?;
        }
        if record_bytes == 0 {
            return Err(TopomapError::UnsupportedFormat(
                "Data records have zero size".to_string(),
            ));
        }

        let available = mmap.len().saturating_sub(header.header_bytes);
        let num_records = if header.num_data_records < 0 {
            log::warn!("Number of data records unknown, deriving it from the file size");
            available / record_bytes
        } else {
            let declared = header.num_data_records as usize;
            let data_bytes = declared.checked_mul(record_bytes).ok_or_else(oversized)?;
            if data_bytes > available {
                return Err(TopomapError::FileReadError(format!(
                    "File truncated: header declares {} records of {} bytes, only {} bytes of data present",
                    declared, record_bytes, available
                )));
            }
            declared
        };

        log::debug!(
            "{} file parsed: {} signals, {} records of {}s",
            header.format.name(),
            header.num_signals,
            num_records,
            header.duration_of_data_record
        );

        Ok(Self {
            mmap,
            header,
            signal_headers,
            num_records,
            record_bytes,
            signal_offsets,
        })
    }

    fn parse_headers(bytes: &[u8]) -> Result<(BiosignalHeader, Vec<SignalHeader>)> {
        let mut cursor = HeaderCursor::new(bytes);

        let version = cursor.raw(8)?;
        let format = if version == BDF_VERSION {
            SampleFormat::Bdf24
        } else if version.iter().all(|b| *b == b'0' || *b == b' ') && version[0] == b'0' {
            SampleFormat::Edf16
        } else {
            return Err(TopomapError::UnsupportedFormat(format!(
                "Unknown version field {:?}",
                String::from_utf8_lossy(version)
            )));
        };

        let patient_id = cursor.string(80)?;
        let recording_id = cursor.string(80)?;
        let start_date = cursor.string(8)?;
        let start_time = cursor.string(8)?;
        let header_bytes: usize = cursor.number(8, "header size")?;
        let reserved = cursor.string(44)?;
        let num_data_records: i64 = cursor.number(8, "number of data records")?;
        let duration_of_data_record: f64 = cursor.number(8, "data record duration")?;
        let num_signals: usize = cursor.number(4, "number of signals")?;

        if num_signals == 0 {
            return Err(TopomapError::UnsupportedFormat("File declares no signals".to_string()));
        }
        if header_bytes != MAIN_HEADER_BYTES + num_signals * SIGNAL_HEADER_BYTES {
            return Err(TopomapError::UnsupportedFormat(format!(
                "Header size {} does not match {} signals",
                header_bytes, num_signals
            )));
        }
        if !duration_of_data_record.is_finite() || duration_of_data_record <= 0.0 {
            return Err(TopomapError::UnsupportedFormat(format!(
                "Data record duration must be positive, got {}",
                duration_of_data_record
            )));
        }
        if num_data_records < -1 {
            return Err(TopomapError::UnsupportedFormat(format!(
                "Invalid number of data records {}",
                num_data_records
            )));
        }

        let n = num_signals;
        let labels = cursor.strings(n, 16)?;
        let transducer_types = cursor.strings(n, 80)?;
        let physical_dimensions = cursor.strings(n, 8)?;
        let physical_minimums: Vec<f64> = cursor.numbers(n, 8, "physical minimum")?;
        let physical_maximums: Vec<f64> = cursor.numbers(n, 8, "physical maximum")?;
        let digital_minimums: Vec<i64> = cursor.numbers(n, 8, "digital minimum")?;
        let digital_maximums: Vec<i64> = cursor.numbers(n, 8, "digital maximum")?;
        let prefilterings = cursor.strings(n, 80)?;
        let num_samples: Vec<usize> = cursor.numbers(n, 8, "number of samples")?;
        let reserveds = cursor.strings(n, 32)?;

        let mut signal_headers = Vec::with_capacity(n);
        for i in 0..n {
            let sh = SignalHeader {
                label: labels[i].clone(),
                transducer_type: transducer_types[i].clone(),
                physical_dimension: physical_dimensions[i].clone(),
                physical_minimum: physical_minimums[i],
                physical_maximum: physical_maximums[i],
                digital_minimum: digital_minimums[i],
                digital_maximum: digital_maximums[i],
                prefiltering: prefilterings[i].clone(),
                num_samples_per_record: num_samples[i],
                reserved: reserveds[i].clone(),
            };
            if !sh.is_annotation() {
                if sh.digital_maximum <= sh.digital_minimum {
                    return Err(TopomapError::UnsupportedFormat(format!(
                        "Signal '{}' has digital maximum {} <= minimum {}",
                        sh.label, sh.digital_maximum, sh.digital_minimum
                    )));
                }
                if sh.physical_maximum == sh.physical_minimum {
                    return Err(TopomapError::UnsupportedFormat(format!(
                        "Signal '{}' has an empty physical range",
                        sh.label
                    )));
                }
                if sh.num_samples_per_record == 0 {
                    return Err(TopomapError::UnsupportedFormat(format!(
                        "Signal '{}' has no samples per record",
                        sh.label
                    )));
                }
            }
            signal_headers.push(sh);
        }

        Ok((
            BiosignalHeader {
                format,
                patient_id,
                recording_id,
                start_date,
                start_time,
                header_bytes,
                reserved,
                num_data_records,
                duration_of_data_record,
                num_signals,
            },
            signal_headers,
        ))
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn total_duration(&self) -> f64 {
        self.num_records as f64 * self.header.duration_of_data_record
    }

    fn signal_bytes(&self, record_index: usize, signal_index: usize) -> &[u8] {
        let sh = &self.signal_headers[signal_index];
        let start = self.header.header_bytes
            + record_index * self.record_bytes
            + self.signal_offsets[signal_index];
        let len = sh.num_samples_per_record * self.header.format.bytes_per_sample();
        &self.mmap[start..start + len]
    }

    /// Read a whole signal, converted to physical units.
    pub fn read_physical_signal(&self, signal_index: usize) -> Result<Vec<f64>> {
        if signal_index >= self.signal_headers.len() {
            return Err(TopomapError::FileReadError(format!(
                "Signal index {} out of bounds",
                signal_index
            )));
        }
        let sh = &self.signal_headers[signal_index];
        let format = self.header.format;
        let bps = format.bytes_per_sample();
        let gain = sh.gain();
        let offset = sh.offset();

        let mut samples = Vec::with_capacity(self.num_records * sh.num_samples_per_record);
        for record in 0..self.num_records {
            samples.extend(
                self.signal_bytes(record, signal_index)
                    .chunks_exact(bps)
                    .map(|b| gain * format.decode(b) as f64 + offset),
            );
        }
        Ok(samples)
    }

    /// Read several signals in parallel; output order follows `signal_indices`.
    pub fn read_physical_signals(&self, signal_indices: &[usize]) -> Result<Vec<Vec<f64>>> {
        signal_indices
            .par_iter()
            .map(|&idx| self.read_physical_signal(idx))
            .collect()
    }

    /// Parse every EDF+/BDF+ annotation signal into annotations.
    pub fn read_annotations(&self) -> Vec<Annotation> {
        let mut annotations = Vec::new();
        for (idx, sh) in self.signal_headers.iter().enumerate() {
            if !sh.is_annotation() {
                continue;
            }
            for record in 0..self.num_records {
                annotations.extend(parse_tal_record(self.signal_bytes(record, idx)));
            }
        }
        annotations
    }
}

/// Writes EDF/BDF files, with an optional EDF+/BDF+ annotation signal.
pub struct BiosignalWriter {
    pub format: SampleFormat,
    pub patient_id: String,
    pub recording_id: String,
    pub start_date: String,
    pub start_time: String,
    pub record_duration: f64,
    pub physical_dimension: String,
}

impl BiosignalWriter {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            patient_id: "X X X X".to_string(),
            recording_id: "Startdate X X X X".to_string(),
            start_date: "01.01.24".to_string(),
            start_time: "00.00.00".to_string(),
            record_duration: 1.0,
            physical_dimension: "uV".to_string(),
        }
    }

    pub fn write<P: AsRef<Path>>(
        &self,
        path: P,
        labels: &[String],
        sample_rate: f64,
        data: &[Vec<f64>],
        annotations: &[Annotation],
    ) -> Result<()> {
        if labels.len() != data.len() || labels.is_empty() {
            return Err(TopomapError::ConfigurationError(format!(
                "Expected one data row per label, got {} labels and {} rows",
                labels.len(),
                data.len()
            )));
        }
        let spr_f = sample_rate * self.record_duration;
        if spr_f.fract() != 0.0 || spr_f < 1.0 {
            return Err(TopomapError::ConfigurationError(format!(
                "Sample rate {} does not give whole samples per {}s record",
                sample_rate, self.record_duration
            )));
        }
        let spr = spr_f as usize;
        let num_samples = data[0].len();
        let num_records = num_samples.div_ceil(spr).max(1);
        let bps = self.format.bytes_per_sample();
        let (dig_min, dig_max) = self.format.digital_range();

        let mut signal_headers: Vec<SignalHeader> = labels
            .iter()
            .zip(data)
            .map(|(label, row)| {
                let mut phys_min = row.iter().copied().fold(f64::INFINITY, f64::min);
                let mut phys_max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if !phys_min.is_finite() || !phys_max.is_finite() || phys_min == phys_max {
                    let centre = if phys_min.is_finite() { phys_min } else { 0.0 };
                    phys_min = centre - 1.0;
                    phys_max = centre + 1.0;
                }
                SignalHeader {
                    label: label.clone(),
                    transducer_type: String::new(),
                    physical_dimension: self.physical_dimension.clone(),
                    physical_minimum: phys_min,
                    physical_maximum: phys_max,
                    digital_minimum: dig_min,
                    digital_maximum: dig_max,
                    prefiltering: String::new(),
                    num_samples_per_record: spr,
                    reserved: String::new(),
                }
            })
            .collect();

        let tal_records: Option<Vec<Vec<u8>>> = if annotations.is_empty() {
            None
        } else {
            Some(
                (0..num_records)
                    .map(|r| {
                        let anns: &[Annotation] = if r == 0 { annotations } else { &[] };
                        encode_tal_record(r as f64 * self.record_duration, anns)
                    })
                    .collect(),
            )
        };
        if let Some(ref records) = tal_records {
            let longest = records.iter().map(|r| r.len()).max().unwrap_or(0);
            signal_headers.push(SignalHeader {
                label: format!("{} Annotations", self.format.name()),
                transducer_type: String::new(),
                physical_dimension: String::new(),
                physical_minimum: -1.0,
                physical_maximum: 1.0,
                digital_minimum: dig_min,
                digital_maximum: dig_max,
                prefiltering: String::new(),
                num_samples_per_record: longest.div_ceil(bps),
                reserved: String::new(),
            });
        }

        let file = File::create(path.as_ref())?;
        let mut out = BufWriter::new(file);

        let num_signals = signal_headers.len();
        let reserved = match (self.format, tal_records.is_some()) {
            (SampleFormat::Edf16, true) => "EDF+C",
            (SampleFormat::Bdf24, true) => "BDF+C",
            (SampleFormat::Bdf24, false) => "24BIT",
            (SampleFormat::Edf16, false) => "",
        };

        let mut header = Vec::with_capacity(MAIN_HEADER_BYTES + num_signals * SIGNAL_HEADER_BYTES);
        match self.format {
            SampleFormat::Bdf24 => header.extend_from_slice(BDF_VERSION),
            SampleFormat::Edf16 => push_field(&mut header, "0", 8),
        }
        push_field(&mut header, &self.patient_id, 80);
        push_field(&mut header, &self.recording_id, 80);
        push_field(&mut header, &self.start_date, 8);
        push_field(&mut header, &self.start_time, 8);
        push_field(&mut header, &(MAIN_HEADER_BYTES + num_signals * SIGNAL_HEADER_BYTES).to_string(), 8);
        push_field(&mut header, reserved, 44);
        push_field(&mut header, &num_records.to_string(), 8);
        push_field(&mut header, &format_number(self.record_duration, 8), 8);
        push_field(&mut header, &num_signals.to_string(), 4);

        for sh in &signal_headers {
            push_field(&mut header, &sh.label, 16);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.transducer_type, 80);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.physical_dimension, 8);
        }
        for sh in &signal_headers {
            push_field(&mut header, &format_number(sh.physical_minimum, 8), 8);
        }
        for sh in &signal_headers {
            push_field(&mut header, &format_number(sh.physical_maximum, 8), 8);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.digital_minimum.to_string(), 8);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.digital_maximum.to_string(), 8);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.prefiltering, 80);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.num_samples_per_record.to_string(), 8);
        }
        for sh in &signal_headers {
            push_field(&mut header, &sh.reserved, 32);
        }
        out.write_all(&header)?;

        // Calibration uses the header values as written, after rounding.
        let calibrations: Vec<(f64, f64)> = signal_headers
            .iter()
            .map(|sh| {
                let mut written = sh.clone();
                written.physical_minimum = format_number(sh.physical_minimum, 8)
                    .parse()
                    .unwrap_or(sh.physical_minimum);
                written.physical_maximum = format_number(sh.physical_maximum, 8)
                    .parse()
                    .unwrap_or(sh.physical_maximum);
                (written.gain(), written.offset())
            })
            .collect();

        let mut record = Vec::new();
        for r in 0..num_records {
            record.clear();
            for (ch, row) in data.iter().enumerate() {
                let (gain, offset) = calibrations[ch];
                for i in r * spr..(r + 1) * spr {
                    let physical = row.get(i).copied().unwrap_or(0.0);
                    let digital = ((physical - offset) / gain).round() as i64;
                    self.format
                        .encode(digital.clamp(dig_min, dig_max) as i32, &mut record);
                }
            }
            if let Some(ref records) = tal_records {
                let sh = &signal_headers[num_signals - 1];
                let mut tal = records[r].clone();
                tal.resize(sh.num_samples_per_record * bps, 0);
                record.extend_from_slice(&tal);
            }
            out.write_all(&record)?;
        }
        out.flush()?;

        log::debug!(
            "Wrote {} file with {} signals and {} records",
            self.format.name(),
            num_signals,
            num_records
        );
        Ok(())
    }
}

fn push_field(buffer: &mut Vec<u8>, value: &str, size: usize) {
    let mut field = vec![b' '; size];
    let bytes = value.as_bytes();
    let len = bytes.len().min(size);
    field[..len].copy_from_slice(&bytes[..len]);
    buffer.extend_from_slice(&field);
}

/// Format a number so it fits in a fixed-width header field.
fn format_number(value: f64, width: usize) -> String {
    if value.fract() == 0.0 {
        let s = format!("{}", value as i64);
        if s.len() <= width {
            return s;
        }
    }
    for precision in (0..width).rev() {
        let s = format!("{:.*}", precision, value);
        if s.len() <= width {
            return s;
        }
    }
    format!("{}", value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_header_calculations() {
        let header = SignalHeader {
            label: "Test".to_string(),
            transducer_type: "".to_string(),
            physical_dimension: "uV".to_string(),
            physical_minimum: -100.0,
            physical_maximum: 100.0,
            digital_minimum: -32768,
            digital_maximum: 32767,
            prefiltering: "".to_string(),
            num_samples_per_record: 256,
            reserved: "".to_string(),
        };

        assert_eq!(header.sample_frequency(1.0), 256.0);
        assert!((header.gain() - 0.00305).abs() < 0.001);
        assert!((header.gain() * 32767.0 + header.offset() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bdf_decode_sign_extension() {
        let format = SampleFormat::Bdf24;
        assert_eq!(format.decode(&[0xff, 0xff, 0xff]), -1);
        assert_eq!(format.decode(&[0x00, 0x00, 0x80]), -8_388_608);
        assert_eq!(format.decode(&[0xff, 0xff, 0x7f]), 8_388_607);
        assert_eq!(format.decode(&[0x01, 0x00, 0x00]), 1);

        let mut out = Vec::new();
        format.encode(-2, &mut out);
        assert_eq!(format.decode(&out), -2);
    }

    #[test]
    fn test_format_number_fits_width() {
        assert_eq!(format_number(1.0, 8), "1");
        assert_eq!(format_number(-3200.0, 8), "-3200");
        assert!(format_number(-123.456789123, 8).len() <= 8);
        assert!(format_number(0.000123456, 8).len() <= 8);
    }

    fn field(value: &str, width: usize) -> String {
        format!("{:<width$}", value, width = width)
    }

    /// Raw EDF header with no data records behind it.
    fn raw_edf_header(num_signals: usize, samples_per_record: &str, num_records: &str) -> Vec<u8> {
        let mut h = String::new();
        h += &field("0", 8);
        h += &field("X X X X", 80);
        h += &field("Startdate X", 80);
        h += &field("01.01.24", 8);
        h += &field("10.00.00", 8);
        h += &field(&(MAIN_HEADER_BYTES + num_signals * SIGNAL_HEADER_BYTES).to_string(), 8);
        h += &field("", 44);
        h += &field(num_records, 8);
        h += &field("1", 8);
        h += &field(&num_signals.to_string(), 4);
        let per_signal: [(&str, usize); 10] = [
            ("", 16),
            ("", 80),
            ("uV", 8),
            ("-100", 8),
            ("100", 8),
            ("-32768", 8),
            ("32767", 8),
            ("", 80),
            (samples_per_record, 8),
            ("", 32),
        ];
        for (value, width) in per_signal {
            for i in 0..num_signals {
                if width == 16 {
                    h += &field(&format!("S{}", i), width);
                } else {
                    h += &field(value, width);
                }
            }
        }
        h.into_bytes()
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.edf");
        std::fs::write(&path, raw_edf_header(9999, "99999999", "99999999")).unwrap();

        let result = std::panic::catch_unwind(|| BiosignalFile::open(&path));
        let err = result.expect("opening a corrupt header must not panic").err().unwrap();
        assert!(matches!(err, TopomapError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_declared_records_beyond_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.edf");
        std::fs::write(&path, raw_edf_header(2, "256", "10")).unwrap();

        let err = BiosignalFile::open(&path).err().unwrap();
        assert!(matches!(err, TopomapError::FileReadError(_)));
    }

    #[test]
    fn test_open_missing_file() {
        let err = BiosignalFile::open("/nonexistent/recording.bdf").err().unwrap();
        assert!(matches!(err, TopomapError::FileReadError(_)));
    }

    #[test]
    fn test_write_then_read_bdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.bdf");
        let labels = vec!["Fp1".to_string(), "Status".to_string()];
        let data = vec![
            (0..512).map(|i| (i as f64 * 0.1).sin() * 50.0).collect::<Vec<_>>(),
            vec![0.0; 512],
        ];
        BiosignalWriter::new(SampleFormat::Bdf24)
            .write(&path, &labels, 256.0, &data, &[])
            .unwrap();

        let file = BiosignalFile::open(&path).unwrap();
        assert_eq!(file.header.format, SampleFormat::Bdf24);
        assert_eq!(file.num_records(), 2);
        assert_eq!(file.signal_headers[0].label, "Fp1");
        let fp1 = file.read_physical_signal(0).unwrap();
        assert_eq!(fp1.len(), 512);
        for (a, b) in fp1.iter().zip(&data[0]) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.edf");
        let labels = vec!["Cz".to_string()];
        BiosignalWriter::new(SampleFormat::Edf16)
            .write(&path, &labels, 100.0, &[vec![1.0; 300]], &[])
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let err = BiosignalFile::open(&path).err().unwrap();
        assert!(matches!(err, TopomapError::FileReadError(_)));
    }

    #[test]
    fn test_garbage_header_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.edf");
        std::fs::write(&path, vec![b'x'; 600]).unwrap();
        let err = BiosignalFile::open(&path).err().unwrap();
        assert!(matches!(err, TopomapError::UnsupportedFormat(_)));
    }
}
