//! Renders voxconv(1) and one voxconv-<command>(1) page per subcommand.
//!
//! Pages land in `$OUT_DIR/man`. Debug builds skip this unless
//! VOXCONV_GEN_MANPAGES is set.

use clap::CommandFactory;
use clap_mangen::Man;
use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

include!("src/cli.rs");

const GEN_ENV: &str = "VOXCONV_GEN_MANPAGES";

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed={}", GEN_ENV);

    let release = env::var("PROFILE").is_ok_and(|p| p == "release");
    if !release && env::var_os(GEN_ENV).is_none() {
        return Ok(());
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("target"));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cli = Cli::command();
    render(cli.clone(), &man_dir.join("voxconv.1"))?;

    let mut pages = 1;
    for command in cli.get_subcommands().filter(|c| !c.is_hide_set() && c.get_name() != "help") {
        let page = format!("voxconv-{}.1", command.get_name());
        render(command.clone(), &man_dir.join(page))?;
        pages += 1;
    }

    println!(
        "cargo:warning={} man pages written to {}",
        pages,
        man_dir.display()
    );
    Ok(())
}

fn render(command: clap::Command, path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    Man::new(command).render(&mut file)
}
