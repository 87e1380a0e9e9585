use crate::cli::MontageArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use topomap_rs::layout::ChannelPosition;
use topomap_rs::Montage;

#[derive(Serialize)]
struct MontageOutput {
    name: String,
    channels: Vec<ChannelPosition>,
}

pub fn execute(args: MontageArgs) -> i32 {
    let montage = Montage::standard_1020();
    let result = MontageOutput {
        name: montage.name().to_string(),
        channels: montage.positions().collect(),
    };

    if args.json {
        if let Err(e) = output::print_json(&result) {
            eprintln!("Error: {}", e);
            return exit_codes::OUTPUT_ERROR;
        }
    } else {
        println!("{} ({} positions)", result.name, result.channels.len());
        for pos in &result.channels {
            println!("  {:<6} x={:+.3} y={:+.3}", pos.label, pos.x, pos.y);
        }
    }

    exit_codes::SUCCESS
}
