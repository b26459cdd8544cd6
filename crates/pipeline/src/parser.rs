use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use shared::domain::ControlNode;

/// Suffix the built-in parser discovers under the source root.
pub const FORM_FILE_SUFFIX: &str = ".form.json";

/// Source-tree parser seam. One `parse` call per discoverable source file;
/// a failure fails that form only, never the run.
#[async_trait]
pub trait FormParser: Send + Sync {
    fn discover(&self, source_root: &Path) -> Result<Vec<PathBuf>>;
    async fn parse(&self, path: &Path) -> Result<ControlNode>;
}

/// Reference parser for the JSON form description format: each
/// `*.form.json` file deserializes directly into a [`ControlNode`] tree.
pub struct JsonFormParser;

#[async_trait]
impl FormParser for JsonFormParser {
    fn discover(&self, source_root: &Path) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        collect_form_files(source_root, &mut found).with_context(|| {
            format!(
                "failed to scan source tree '{}' for form files",
                source_root.display()
            )
        })?;
        found.sort();
        Ok(found)
    }

    async fn parse(&self, path: &Path) -> Result<ControlNode> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read form file '{}'", path.display()))?;
        let tree: ControlNode = serde_json::from_str(&raw)
            .with_context(|| format!("invalid form description in '{}'", path.display()))?;
        if tree.name.is_empty() {
            bail!("form '{}' has no root display name", path.display());
        }
        Ok(tree)
    }
}

fn collect_form_files(dir: &Path, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_form_files(&path, found)?;
        } else if path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(FORM_FILE_SUFFIX))
        {
            found.push(path);
        }
    }
    Ok(())
}
