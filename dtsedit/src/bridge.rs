//! Bridge to the external device tree compiler (`dtc`).
//!
//! The editor never reads or writes DTB bytes itself. Importing a blob asks
//! `dtc` to turn it into DTS text for the decoder; saving hands encoder output
//! to `dtc` to produce the blob.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use serde::Serialize;

/// A failure to run the compiler. Serializable so it can cross the same
/// boundary as decode errors.
#[derive(Debug, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeError {
    #[error("no device tree blob given")]
    NoSource,

    #[error("failed to run `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("`{program}` failed ({status}): {stderr}")]
    Compiler {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("`{program}` produced output that is not valid UTF-8")]
    InvalidOutput { program: String },
}

/// How to invoke the compiler.
#[derive(Debug, Clone)]
pub struct Dtc {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for Dtc {
    fn default() -> Self {
        Self::new("dtc")
    }
}

impl Dtc {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments passed before the ones the bridge adds itself.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Decompiles a device tree blob and returns the DTS text.
    pub fn dtb_to_dts(&self, source: Option<&Path>) -> Result<String, BridgeError> {
        let source = source.ok_or(BridgeError::NoSource)?;
        let mut args = vec!["-I", "dtb", "-O", "dts", "-o", "-"];
        let source = source.to_string_lossy();
        args.push(&source);

        let stdout = self.run(&args, None)?;
        String::from_utf8(stdout).map_err(|_| BridgeError::InvalidOutput {
            program: self.program_name(),
        })
    }

    /// Compiles DTS text into a blob at `dest`, returning `dest`.
    pub fn compile_dts(&self, text: &str, dest: &Path) -> Result<PathBuf, BridgeError> {
        let dest_arg = dest.to_string_lossy();
        self.run(
            &["-I", "dts", "-O", "dtb", "-o", &dest_arg, "-"],
            Some(text.as_bytes()),
        )?;
        Ok(dest.to_path_buf())
    }

    fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<Vec<u8>, BridgeError> {
        let program = self.program_name();
        tracing::debug!(%program, extra = ?self.args, ?args, "running device tree compiler");

        let spawn_error = |e: std::io::Error| BridgeError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            // The exit status below reports why the compiler stopped reading.
            if let Err(e) = stdin.write_all(input) {
                tracing::debug!(%program, error = %e, "compiler closed its input early");
            }
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if !output.status.success() {
            return Err(BridgeError::Compiler {
                program,
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            tracing::warn!(%program, "{stderr}");
        }
        Ok(output.stdout)
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A shell script standing in for `dtc`. The bridge appends its own
    /// arguments after `sh -c <script> sh`, so they start at `$1`.
    fn fake_dtc(script: &str) -> Dtc {
        Dtc::new("sh").with_args(["-c", script, "sh"])
    }

    #[test]
    fn missing_source() {
        assert!(matches!(
            Dtc::default().dtb_to_dts(None),
            Err(BridgeError::NoSource)
        ));
    }

    #[test]
    fn missing_program() {
        let err = Dtc::new("/nonexistent/dtc")
            .dtb_to_dts(Some(Path::new("board.dtb")))
            .unwrap_err();
        assert!(
            matches!(&err, BridgeError::Spawn { program, .. } if program == "/nonexistent/dtc"),
            "{err:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn decompile_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("board.dtb");
        std::fs::write(&blob, "/dts-v1/;\n/ { };\n").unwrap();

        // $7 is the source path after `-I dtb -O dts -o -`.
        let text = fake_dtc(r#"cat "$7""#).dtb_to_dts(Some(&blob)).unwrap();
        assert_eq!(text, "/dts-v1/;\n/ { };\n");
    }

    #[cfg(unix)]
    #[test]
    fn compile_feeds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("board.dtb");

        // $6 is the destination after `-I dts -O dtb -o`.
        let written = fake_dtc(r#"cat > "$6""#)
            .compile_dts("/dts-v1/;\n/ { };\n", &dest)
            .unwrap();
        assert_eq!(written, dest);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "/dts-v1/;\n/ { };\n");
    }

    #[cfg(unix)]
    #[test]
    fn compiler_failure_keeps_stderr() {
        let err = fake_dtc("echo 'syntax error' >&2; exit 2")
            .compile_dts("garbage", Path::new("out.dtb"))
            .unwrap_err();
        assert!(
            matches!(&err, BridgeError::Compiler { stderr, .. } if stderr == "syntax error"),
            "{err:?}"
        );

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "compiler");
    }
}
