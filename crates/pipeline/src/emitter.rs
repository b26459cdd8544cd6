use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::ControlNode;
use shared::layout::LayoutAnalysisResult;

use crate::parser::FORM_FILE_SUFFIX;

/// Naming inputs the emitters derive artifact names from.
pub struct NamingContext {
    pub form_name: String,
    pub source_path: PathBuf,
    /// Source file path relative to the source root. Artifact paths mirror
    /// it, so forms that share a display name across files never overwrite
    /// each other's output.
    pub relative_source: PathBuf,
}

/// One generated text artifact, addressed relative to the output root.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub relative_path: PathBuf,
    pub contents: String,
}

/// Emitter seam: turns a control tree plus its layout classification into
/// named text artifacts. Mapping tables and target-format fidelity live
/// behind this seam, not in the core.
#[async_trait]
pub trait ArtifactEmitter: Send + Sync {
    async fn emit(
        &self,
        tree: &ControlNode,
        layout: &LayoutAnalysisResult,
        naming: &NamingContext,
    ) -> Result<Vec<Artifact>>;
}

/// Reference emitter producing a layout-annotated markup document plus a
/// handler-wiring listing per form.
pub struct MarkupEmitter;

#[async_trait]
impl ArtifactEmitter for MarkupEmitter {
    async fn emit(
        &self,
        tree: &ControlNode,
        layout: &LayoutAnalysisResult,
        naming: &NamingContext,
    ) -> Result<Vec<Artifact>> {
        Ok(vec![
            Artifact {
                relative_path: artifact_path(naming, "layout.xml"),
                contents: render_markup(tree, layout),
            },
            Artifact {
                relative_path: artifact_path(naming, "handlers.txt"),
                contents: render_handlers(tree, naming),
            },
        ])
    }
}

/// `sub/billing.form.json` becomes `sub/billing.layout.xml`: one artifact
/// tree mirroring the source tree, keyed by file name rather than by the
/// root display name (which is only unique within a file).
fn artifact_path(naming: &NamingContext, extension: &str) -> PathBuf {
    let file_name = naming
        .relative_source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| naming.form_name.clone());
    let stem = file_name.strip_suffix(FORM_FILE_SUFFIX).unwrap_or(&file_name);
    naming
        .relative_source
        .with_file_name(format!("{stem}.{extension}"))
}

fn render_markup(tree: &ControlNode, layout: &LayoutAnalysisResult) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    render_node(tree, Some(layout), 0, &mut out);
    out
}

fn render_node(
    node: &ControlNode,
    layout: Option<&LayoutAnalysisResult>,
    depth: usize,
    out: &mut String,
) {
    let pad = "  ".repeat(depth);
    let _ = write!(
        out,
        "{pad}<{} name=\"{}\"",
        escape_xml(&node.kind),
        escape_xml(&node.name)
    );
    if let Some(result) = layout {
        let _ = write!(
            out,
            " layout=\"{}\" layout-confidence=\"{}\"",
            result.kind, result.confidence
        );
    }
    if let Some(text) = node.property("text").and_then(|v| v.as_str()) {
        let _ = write!(out, " text=\"{}\"", escape_xml(text));
    }
    if let Some((x, y)) = node.position() {
        let _ = write!(out, " x=\"{x}\" y=\"{y}\"");
    }
    if let Some(edge) = node.dock_edge() {
        let _ = write!(out, " dock=\"{}\"", escape_xml(edge));
    }

    if node.children.is_empty() && node.bindings.is_empty() {
        out.push_str(" />\n");
        return;
    }
    out.push_str(">\n");

    for binding in &node.bindings {
        let _ = writeln!(
            out,
            "{pad}  <binding property=\"{}\" source=\"{}\" member=\"{}\" />",
            escape_xml(&binding.property),
            escape_xml(&binding.data_source),
            escape_xml(&binding.data_member)
        );
    }
    for child in &node.children {
        let child_layout = layout.and_then(|l| l.children.get(&child.name));
        render_node(child, child_layout, depth + 1, out);
    }
    let _ = writeln!(out, "{pad}</{}>", escape_xml(&node.kind));
}

fn render_handlers(tree: &ControlNode, naming: &NamingContext) -> String {
    let mut out = format!(
        "# Event handlers for {} ({})\n",
        naming.form_name,
        naming.source_path.display()
    );
    tree.walk(&mut |node| {
        for (event, handler) in &node.events {
            let _ = writeln!(out, "{}.{event} -> {handler}", node.name);
        }
    });
    out
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
