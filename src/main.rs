//! depositctl - deposit store CLI tool
//!
//! Lists recorded deposits, inserts deposits by hand and manages the
//! tracker's cursor checkpoint in the RocksDB store.

use deposit_tracker::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
