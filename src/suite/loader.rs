//! Suite file discovery and loading

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::{Error, Result};
use crate::suite::schema::TestSuite;

/// Load and validate a single suite file
pub fn load_suite(path: &Path) -> Result<TestSuite> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let suite: TestSuite =
        serde_yaml::from_str(&content).map_err(|e| Error::suite_parse(path, e.to_string()))?;
    for test in &suite.tests {
        test.validate()
            .map_err(|e| Error::suite_parse(path, e))?;
    }
    Ok(suite)
}

/// Discover every `*.yaml` suite under a directory (or load one file).
/// Suites are returned in path order for stable run order. Files that
/// fail to parse are reported and skipped so one bad suite does not sink
/// the run.
pub fn discover_suites(root: &Path) -> Result<Vec<(PathBuf, TestSuite)>> {
    let paths = yaml_files(root)?;
    let mut suites = Vec::new();
    for path in paths {
        match load_suite(&path) {
            Ok(suite) => suites.push((path, suite)),
            Err(e) => warn!("skipping {}: {e}", path.display()),
        }
    }
    Ok(suites)
}

/// Every `*.yaml`/`*.yml` under the root, in sorted order; a file path
/// is returned as-is
pub fn yaml_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if root.is_file() {
        paths.push(root.to_path_buf());
    } else {
        collect_yaml_files(root, &mut paths)?;
        paths.sort();
    }
    Ok(paths)
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir).map_err(|e| Error::FileRead {
        path: dir.display().to_string(),
        error: e.to_string(),
    })? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            out.push(path);
        }
    }
    Ok(())
}
