//! KVFS mount binary
//!
//! Parses the command line, then hands control to the driver until the
//! filesystem is unmounted.

use clap::Parser;
use kvfs::cli::{self, Cli};
use std::process;

fn main() {
    let cli = Cli::parse();
    process::exit(cli::run(cli));
}
