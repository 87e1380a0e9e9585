use topomap_rs::ErrorKind;

pub const SUCCESS: i32 = 0;
pub const INPUT_ERROR: i32 = 2;
pub const PIPELINE_ERROR: i32 = 3;
pub const OUTPUT_ERROR: i32 = 4;

/// Exit code for a failed run: bad input files and configuration are the
/// caller's to fix, everything else is a pipeline failure.
pub fn for_error_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::FileRead | ErrorKind::UnsupportedFormat | ErrorKind::Configuration => INPUT_ERROR,
        _ => PIPELINE_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(for_error_kind(ErrorKind::Configuration), INPUT_ERROR);
        assert_eq!(for_error_kind(ErrorKind::FileRead), INPUT_ERROR);
        assert_eq!(for_error_kind(ErrorKind::NoUsableChannels), PIPELINE_ERROR);
        assert_eq!(for_error_kind(ErrorKind::Render), PIPELINE_ERROR);
    }
}
