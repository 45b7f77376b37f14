//! Dump a capture log: header, per-chunk listing with per-kind totals, and
//! the frame's event list and drawcall tree (rebuilt by replaying the log
//! against the headless driver).

use std::env;
use std::path::PathBuf;

mod listing;

use listing::{ListingFormat, LogListing};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut format = ListingFormat::Text;
    let mut path: Option<PathBuf> = None;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--json" => format = ListingFormat::Json,
            "--text" => format = ListingFormat::Text,
            other => path = Some(PathBuf::from(other)),
        }
    }

    let Some(path) = path else {
        eprintln!("usage: refract-dump [--json] <capture.rfrc>");
        std::process::exit(2);
    };

    let listing = LogListing::from_file(&path)?;
    match format {
        ListingFormat::Text => print!("{}", listing.to_text()),
        ListingFormat::Json => println!("{}", listing.to_json()?),
    }
    Ok(())
}
