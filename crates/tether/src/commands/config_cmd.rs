//! Config subcommand handlers.

use tether_config::{Config, save_config_to};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = super::config_file(global);

    match args.command {
        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = super::load_config(global)?;
            let as_toml = toml::to_string_pretty(&cfg)?;
            let rendered = output::render_single(
                &global.output,
                &cfg,
                |_| as_toml.clone(),
                |_| as_toml.clone(),
            )?;
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config_to(&Config::default(), &path)?;
            output::print_output(
                &format!("Wrote default configuration to {}", path.display()),
                global.quiet,
            );
            Ok(())
        }
    }
}
