use crate::cli::ColormapsArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use topomap_rs::Colormap;

#[derive(Serialize)]
struct ColormapEntry {
    name: &'static str,
    diverging: bool,
    default: bool,
}

pub fn execute(args: ColormapsArgs) -> i32 {
    let default = Colormap::default();
    let entries: Vec<ColormapEntry> = Colormap::all()
        .iter()
        .map(|c| ColormapEntry {
            name: c.name(),
            diverging: c.is_diverging(),
            default: *c == default,
        })
        .collect();

    if args.json {
        if let Err(e) = output::print_json(&entries) {
            eprintln!("Error: {}", e);
            return exit_codes::OUTPUT_ERROR;
        }
    } else {
        for entry in &entries {
            let mut notes = Vec::new();
            if entry.diverging {
                notes.push("diverging");
            }
            if entry.default {
                notes.push("default");
            }
            if notes.is_empty() {
                println!("{}", entry.name);
            } else {
                println!("{:<10} ({})", entry.name, notes.join(", "));
            }
        }
    }

    exit_codes::SUCCESS
}
