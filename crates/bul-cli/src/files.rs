//! Class file collection.

use anyhow::{bail, Context};
use std::path::{Path, PathBuf};

fn is_class_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("class")
}

/// Collect `.class` files from the given files and directories.
///
/// Directories are searched recursively; the result is sorted and free of
/// duplicates.
pub fn collect_class_files(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            if !is_class_file(input) {
                bail!("{} is not a .class file", input.display());
            }
            files.push(input.clone());
        } else if input.is_dir() {
            let pattern = input.join("**").join("*.class");
            let pattern = pattern
                .to_str()
                .with_context(|| format!("non UTF-8 path {}", input.display()))?;
            for entry in glob::glob(pattern)? {
                let path = entry?;
                if path.is_file() {
                    files.push(path);
                }
            }
        } else {
            bail!("{} does not exist", input.display());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
