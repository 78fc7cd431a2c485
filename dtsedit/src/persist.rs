//! Loading and saving device tree sources.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use dts_core::DtsMap;
use serde::Serialize;

use crate::bridge::Dtc;

/// The files written by [`save`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedArtifacts {
    pub dts: PathBuf,
    pub dtb: PathBuf,
}

/// Reads a DTS (or JSON) file as text.
pub fn load(path: &Path) -> Result<String> {
    tracing::debug!(path = %path.display(), "loading");
    fs::read_to_string(path).with_context(|| format!("failed to read `{}`", path.display()))
}

/// Writes the canonical encoding of `tree` to `dts_path` and compiles a blob
/// next to it, with the same stem and a `.dtb` extension.
///
/// The DTS file is written before the compiler runs, so it survives a
/// compiler failure.
pub fn save(tree: &DtsMap, dts_path: &Path, dtc: &Dtc) -> Result<SavedArtifacts> {
    let dtb_path = dts_path.with_extension("dtb");
    if dtb_path == dts_path {
        bail!(
            "refusing to overwrite `{}` with its own blob",
            dts_path.display()
        );
    }

    let text = dts_core::to_string(tree);
    fs::write(dts_path, &text)
        .with_context(|| format!("failed to write `{}`", dts_path.display()))?;
    tracing::info!(path = %dts_path.display(), nodes = tree.node_count(), "wrote source");

    let dtb = dtc
        .compile_dts(&text, &dtb_path)
        .with_context(|| format!("failed to compile `{}`", dts_path.display()))?;
    tracing::info!(path = %dtb.display(), "wrote blob");

    Ok(SavedArtifacts {
        dts: dts_path.to_path_buf(),
        dtb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dts_core::Node;

    fn sample() -> DtsMap {
        let mut tree = DtsMap::new();
        tree.insert_child("/", Node::builder("isp@0").property("status", "okay").build())
            .unwrap();
        tree
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.dts");
        let err = load(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("missing.dts"), "{err:#}");
    }

    #[cfg(unix)]
    #[test]
    fn save_writes_source_and_blob() {
        let dir = tempfile::tempdir().unwrap();
        let dts = dir.path().join("board.dts");
        let dtc = Dtc::new("sh").with_args(["-c", r#"cat > "$6""#, "sh"]);

        let saved = save(&sample(), &dts, &dtc).unwrap();
        assert_eq!(
            saved,
            SavedArtifacts {
                dts: dts.clone(),
                dtb: dir.path().join("board.dtb"),
            }
        );

        let text = load(&saved.dts).unwrap();
        assert_eq!(dts_core::from_str(&text).unwrap(), sample());
        assert_eq!(load(&saved.dtb).unwrap(), text);
    }

    #[test]
    fn source_survives_compiler_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dts = dir.path().join("board.dts");

        let err = save(&sample(), &dts, &Dtc::new("/nonexistent/dtc")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to compile"), "{err:#}");
        assert!(dts.exists());
    }

    #[test]
    fn blob_path_must_differ() {
        let dir = tempfile::tempdir().unwrap();
        let err = save(&sample(), &dir.path().join("board.dtb"), &Dtc::default()).unwrap_err();
        assert!(err.to_string().contains("refusing"), "{err}");
    }
}
