use std::path::{Path, PathBuf};

use {anyhow::Result, clap::Subcommand};

use bidfeed_config::{BidfeedConfig, find_config_file, load_config, set_config_dir, to_toml_string};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Parse and validate the configuration, failing on any error.
    Check,
}

pub fn handle_config(action: &ConfigAction, path: Option<&Path>, dir: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => show(path, dir),
        ConfigAction::Check => check(path, dir),
    }
}

fn show(path: Option<&Path>, dir: Option<&Path>) -> Result<()> {
    let (config, _) = resolve(path, dir)?;
    print!("{}", to_toml_string(&config)?);
    Ok(())
}

fn check(path: Option<&Path>, dir: Option<&Path>) -> Result<()> {
    let (config, source) = resolve(path, dir)?;
    config.validate()?;
    match source {
        Some(path) => println!("{}: ok", path.display()),
        None => println!("no config file found; defaults are valid"),
    }
    Ok(())
}

/// Strict loading: unlike `serve`, a file that fails to parse is an error
/// rather than a fallback to defaults.
fn resolve(path: Option<&Path>, dir: Option<&Path>) -> Result<(BidfeedConfig, Option<PathBuf>)> {
    let found = match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            if let Some(dir) = dir {
                set_config_dir(dir.to_path_buf());
            }
            find_config_file()
        },
    };
    match found {
        Some(path) => Ok((load_config(&path)?, Some(path))),
        None => Ok((BidfeedConfig::default(), None)),
    }
}
