use crate::cli::{self, RunArgs};
use crate::exit_codes;
use crate::output;
use std::path::{Path, PathBuf};
use topomap_rs::{Montage, Pipeline, RecordingSource, TopomapSession};

pub async fn execute(args: RunArgs) -> i32 {
    if !Path::new(&args.file).is_file() {
        eprintln!("Error: File not found: {}", args.file);
        return exit_codes::INPUT_ERROR;
    }

    let config = match cli::build_config(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let mut pipeline = Pipeline::new(config);
    if let Some(ref path) = args.montage_file {
        match Montage::from_json_file(Path::new(path)) {
            Ok(montage) => pipeline = pipeline.with_montage(montage),
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        }
    }

    let (output_path, format) = match cli::resolve_output(&args) {
        Ok(resolved) => resolved,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    if !args.quiet {
        eprintln!("Rendering topomaps for {}...", args.file);
    }

    let session = TopomapSession::new();
    let mut handle = match session.start_pipeline(pipeline, RecordingSource::Path(PathBuf::from(&args.file))) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::PIPELINE_ERROR;
        }
    };

    while let Some(event) = handle.next_event().await {
        if !args.quiet && !event.is_terminal() {
            eprintln!("  {}", event.status_text());
        }
    }

    let result = match handle.wait().await {
        Ok(r) => r,
        Err(failure) => {
            eprintln!("Error: {}", failure);
            return exit_codes::for_error_kind(failure.kind());
        }
    };

    if let Err(e) = result.render.save_as(&output_path, format) {
        eprintln!("Error: Failed to write figure '{}': {}", output_path.display(), e);
        return exit_codes::OUTPUT_ERROR;
    }

    if !args.quiet {
        let flagged = result.mask.flagged();
        if !flagged.is_empty() {
            eprintln!("Flagged channels: {}", flagged.join(", "));
        }
        if !result.layout.unmapped().is_empty() {
            eprintln!("Channels without a position: {}", result.layout.unmapped().join(", "));
        }
        eprintln!("Figure written to {}", output_path.display());
    }

    if args.json {
        if let Err(e) = output::print_json(&result.summary()) {
            eprintln!("Error: {}", e);
            return exit_codes::OUTPUT_ERROR;
        }
    }

    exit_codes::SUCCESS
}
