//! CSS Forge Binary

use cssforge::{CrushError, ForgeCli};
use std::process;

fn main() {
    let mut cli = ForgeCli::new();
    match cli.run() {
        Ok(()) => {}
        Err(CrushError::Config { message }) => {
            eprintln!("{}", message);
            process::exit(2);
        }
        Err(CrushError::Io(e)) => {
            eprintln!("IO Error: {}", e);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Compilation failed: {}", e);
            process::exit(1);
        }
    }
}
