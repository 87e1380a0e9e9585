use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use std::path::Path;
use topomap_rs::FileReaderFactory;

pub fn execute(args: InfoArgs) -> i32 {
    let path = Path::new(&args.file);
    if !path.is_file() {
        eprintln!("Error: File not found: {}", args.file);
        return exit_codes::INPUT_ERROR;
    }

    let metadata = match FileReaderFactory::create_reader(path).and_then(|r| r.metadata()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if args.json {
        if let Err(e) = output::print_json(&metadata) {
            eprintln!("Error: {}", e);
            return exit_codes::OUTPUT_ERROR;
        }
        return exit_codes::SUCCESS;
    }

    println!("File: {} ({})", metadata.file_name, metadata.file_type);
    println!("Size: {} bytes", metadata.file_size);
    println!("Sampling rate: {} Hz", metadata.sample_rate);
    println!(
        "Duration: {:.2} s ({} samples)",
        metadata.duration, metadata.num_samples
    );
    if let Some(ref start) = metadata.start_time {
        println!("Start: {}", start);
    }
    println!("Annotations: {}", metadata.num_annotations);
    println!("Channels ({}):", metadata.num_channels);
    for (label, kind) in metadata.channels.iter().zip(&metadata.channel_kinds) {
        println!("  {:<12} {}", label, kind);
    }

    exit_codes::SUCCESS
}
