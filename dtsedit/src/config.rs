use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::bridge::Dtc;

/// Edit, validate and persist device tree sources.
#[derive(Debug, Parser)]
#[command(name = "dtsedit", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub dtc: DtcArgs,

    /// Log bridge and persistence activity (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Args)]
pub struct DtcArgs {
    /// Device tree compiler used to read and write blobs.
    #[arg(long = "dtc", env = "DTSEDIT_DTC", default_value = "dtc", global = true)]
    pub program: PathBuf,

    /// Extra argument passed to the compiler (repeatable).
    #[arg(long = "dtc-arg", global = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl DtcArgs {
    pub fn dtc(&self) -> Dtc {
        Dtc::new(&self.program).with_args(self.args.iter().cloned())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a source and report whether it is valid.
    Check {
        /// Source file, or stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Rewrite a source in canonical form.
    Fmt {
        file: Option<PathBuf>,
        /// Output file, or stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the JSON form of a source.
    ToJson { file: Option<PathBuf> },
    /// Encode a JSON tree as DTS.
    FromJson {
        file: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decompile a blob with the compiler and print it.
    Import {
        dtb: PathBuf,
        /// Print JSON instead of DTS.
        #[arg(long)]
        json: bool,
    },
    /// Write a source and its compiled blob.
    Save {
        file: Option<PathBuf>,
        /// Destination `.dts` path; the blob is written next to it.
        #[arg(long)]
        out: PathBuf,
        /// Read the input as JSON.
        #[arg(long)]
        json: bool,
    },
}
