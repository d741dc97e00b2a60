//! Renders the `gantry.1` man page into `OUT_DIR` from the clap definitions
//! shared with the binary.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "gantry.1";

fn render_man_page() -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    Man::new(cli::Cli::command()).render(&mut buffer)?;
    Ok(buffer)
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    fs::write(out_dir.join(MAN_PAGE), render_man_page()?)?;
    Ok(())
}
