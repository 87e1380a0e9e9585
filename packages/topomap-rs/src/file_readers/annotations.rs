//! EDF+ time-stamped annotation lists (TAL)
//!
//! Each annotation record holds one or more TALs terminated by a NUL byte:
//! `+onset[\x15duration]\x14description\x14[description\x14...]\0`.
//! The first TAL of a record only keeps time and carries no description.

use crate::types::Annotation;

const DURATION_MARK: u8 = 0x15;
const FIELD_END: u8 = 0x14;

/// Parse one annotation-signal record into annotations.
///
/// Malformed TALs are skipped with a warning rather than failing the load.
pub fn parse_tal_record(bytes: &[u8]) -> Vec<Annotation> {
    let mut annotations = Vec::new();

    for tal in bytes.split(|b| *b == 0).filter(|t| !t.is_empty()) {
        let Some(time_end) = tal.iter().position(|b| *b == FIELD_END) else {
            continue;
        };
        let time = &tal[..time_end];
        let (onset_bytes, duration_bytes) = match time.iter().position(|b| *b == DURATION_MARK) {
            Some(pos) => (&time[..pos], Some(&time[pos + 1..])),
            None => (time, None),
        };

        let Some(onset) = parse_seconds(onset_bytes) else {
            log::warn!(
                "Skipping annotation with invalid onset '{}'",
                String::from_utf8_lossy(onset_bytes)
            );
            continue;
        };
        let duration = duration_bytes.and_then(parse_seconds).unwrap_or(0.0);

        for description in tal[time_end + 1..]
            .split(|b| *b == FIELD_END)
            .filter(|d| !d.is_empty())
        {
            annotations.push(Annotation::new(
                onset,
                duration,
                String::from_utf8_lossy(description).trim().to_string(),
            ));
        }
    }

    annotations
}

/// Encode a record's time-keeping TAL followed by the given annotations.
pub fn encode_tal_record(record_onset: f64, annotations: &[Annotation]) -> Vec<u8> {
    let mut out = format!("{:+}", record_onset).into_bytes();
    out.extend_from_slice(&[FIELD_END, FIELD_END, 0]);

    for ann in annotations {
        out.extend_from_slice(format!("{:+}", ann.onset).as_bytes());
        if ann.duration > 0.0 {
            out.push(DURATION_MARK);
            out.extend_from_slice(ann.duration.to_string().as_bytes());
        }
        out.push(FIELD_END);
        out.extend_from_slice(ann.description.as_bytes());
        out.extend_from_slice(&[FIELD_END, 0]);
    }

    out
}

fn parse_seconds(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes)
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timekeeping_only() {
        let record = b"+0\x14\x14\0\0\0\0";
        assert!(parse_tal_record(record).is_empty());
    }

    #[test]
    fn test_parse_annotations_with_and_without_duration() {
        let record = b"+0\x14\x14\0+1.5\x152.25\x14BAD_muscle\x14\0+4\x14Stimulus\x14Marker\x14\0\0\0";
        let anns = parse_tal_record(record);
        assert_eq!(anns.len(), 3);
        assert_eq!(anns[0], Annotation::new(1.5, 2.25, "BAD_muscle"));
        assert_eq!(anns[1], Annotation::new(4.0, 0.0, "Stimulus"));
        assert_eq!(anns[2].description, "Marker");
    }

    #[test]
    fn test_encode_then_parse() {
        let anns = vec![Annotation::bad(2.0, 3.5), Annotation::new(7.25, 0.0, "eyes closed")];
        let bytes = encode_tal_record(0.0, &anns);
        assert!(bytes.starts_with(b"+0\x14\x14\0"));
        assert_eq!(parse_tal_record(&bytes), anns);
    }

    #[test]
    fn test_invalid_onset_is_skipped() {
        let record = b"+x\x14BAD\x14\0+1\x14BAD\x14\0";
        let anns = parse_tal_record(record);
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].onset, 1.0);
    }
}
