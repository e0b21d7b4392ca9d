use std::path::{Path, PathBuf};
use std::{env, fs, io};

use clap::CommandFactory;
use clap_complete::Shell;

// Compiles only the clap definitions, so the build script needs nothing
// beyond its build-dependencies.
#[path = "src/cli.rs"]
mod cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=src/cli.rs");

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "OUT_DIR not set by Cargo")
    })?);

    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;
    let mut pending = vec![cli::Cli::command()];
    while let Some(cmd) = pending.pop() {
        write_manpage(&cmd, &man_dir)?;
        let parent = cmd.get_name().to_owned();
        pending.extend(
            cmd.get_subcommands()
                .filter(|sub| !sub.is_hide_set())
                .map(|sub| sub.clone().name(format!("{parent}-{}", sub.get_name()))),
        );
    }

    let completion_dir = out_dir.join("completions");
    fs::create_dir_all(&completion_dir)?;
    let mut cmd = cli::Cli::command();
    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
        clap_complete::generate_to(shell, &mut cmd, "tether", &completion_dir)?;
    }
    Ok(())
}

/// `tether-config-init.1` and friends: one page per (sub)command.
fn write_manpage(cmd: &clap::Command, dir: &Path) -> io::Result<()> {
    let mut page = Vec::new();
    clap_mangen::Man::new(cmd.clone()).render(&mut page)?;
    fs::write(dir.join(format!("{}.1", cmd.get_name())), page)
}
