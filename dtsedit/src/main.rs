use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
    process,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dts_core::DtsMap;
use tracing_subscriber::EnvFilter;

mod bridge;
mod config;
mod persist;

use config::{Cli, Command};

/// Source text together with the name used in diagnostics.
struct Input {
    name: String,
    text: String,
}

impl Input {
    fn read(file: Option<&Path>) -> Result<Self> {
        match file {
            Some(path) => Ok(Self {
                name: path.display().to_string(),
                text: persist::load(path)?,
            }),
            None => {
                let mut text = String::new();
                BufReader::new(io::stdin())
                    .read_to_string(&mut text)
                    .context("failed to read stdin")?;
                Ok(Self {
                    name: "<stdin>".into(),
                    text,
                })
            }
        }
    }

    fn decode(&self) -> Result<DtsMap> {
        dts_core::from_str(&self.text).map_err(|e| match e.location() {
            Some(location) => anyhow!("{}:{location} {e}", self.name),
            None => anyhow!("{}: {e}", self.name),
        })
    }

    fn decode_json(&self) -> Result<DtsMap> {
        serde_json::from_str(&self.text).with_context(|| format!("{}: invalid tree", self.name))
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(-1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Check { file } => {
            let input = Input::read(file.as_deref())?;
            let tree = input.decode()?;
            println!("ok: {} nodes", tree.node_count());
        }
        Command::Fmt { file, output } => {
            let tree = Input::read(file.as_deref())?.decode()?;
            emit(output.as_deref(), &dts_core::to_string(&tree))?;
        }
        Command::ToJson { file } => {
            let tree = Input::read(file.as_deref())?.decode()?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Command::FromJson { file, output } => {
            let tree = Input::read(file.as_deref())?.decode_json()?;
            emit(output.as_deref(), &dts_core::to_string(&tree))?;
        }
        Command::Import { dtb, json } => {
            let text = cli.dtc.dtc().dtb_to_dts(Some(&dtb))?;
            let input = Input {
                name: dtb.display().to_string(),
                text,
            };
            let tree = input.decode()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", dts_core::to_string(&tree));
            }
        }
        Command::Save { file, out, json } => {
            let input = Input::read(file.as_deref())?;
            let tree = if json {
                input.decode_json()?
            } else {
                input.decode()?
            };
            let saved = persist::save(&tree, &out, &cli.dtc.dtc())?;
            println!("{}", serde_json::to_string(&saved)?);
        }
    }
    Ok(())
}

/// Writes `text` to `output`, or to stdout when no path is given.
fn emit(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("failed to create `{}`", path.display()))?;
            file.write_all(text.as_bytes())?;
            tracing::debug!(path = %path.display(), "wrote output");
        }
        None => io::stdout().write_all(text.as_bytes())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::*;

    fn input(text: &str) -> Input {
        Input {
            name: "board.dts".into(),
            text: text.into(),
        }
    }

    #[test]
    fn decode_errors_name_the_source() {
        let err = input("/dts-v1/;\n/ {\n    a = <1\n").decode().unwrap_err();
        assert_eq!(
            err.to_string(),
            "board.dts:4.1 property `a` is not terminated"
        );
    }

    #[test]
    fn json_input_round_trips() {
        let tree = input("/dts-v1/;\n/ { isp@0 { reg = <0>; }; };").decode().unwrap();
        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(input(&json).decode_json().unwrap(), tree);
    }

    #[test]
    fn emit_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("out.dts");
        emit(Some(&path), "/dts-v1/;\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "/dts-v1/;\n");
    }
}
