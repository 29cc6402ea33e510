use std::env;
use std::path::Path;
use std::process;

use dat_matcher::batch::BatchScanner;
use dat_matcher::builder::AutomatonBuilder;
use dat_matcher::dict::DictLoader;

/// CLI entry point for the matcher.
///
/// Usage: `dat-matcher <dict.json> <text.txt>`
fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: dat-matcher <dict.json> <text.txt>");
        process::exit(1);
    }

    let dict_path = Path::new(&args[1]);
    let text_path = Path::new(&args[2]);

    let entries = match DictLoader::load_from_file(dict_path) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let mut builder = AutomatonBuilder::new(false);
    builder.add_all(entries.into_iter().map(|e| (e.key, e.value)));
    let automaton = match builder.build() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let scanner = BatchScanner::new(&automaton);
    let results = match scanner.scan_file(text_path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    for result in &results {
        let hits: Vec<String> = result.hits.iter().map(|h| h.to_string()).collect();
        println!("{} -> {}", result.line, hits.join(" "));
    }
}
