//! Layout inference over a parsed control tree.
//!
//! Classifies each container's direct children into one of the closed set
//! of layout kinds using positional heuristics with integer confidence
//! scoring, recursing into nested containers. Pure: no I/O, no shared
//! state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared::domain::ControlNode;
use shared::layout::{LayoutAnalysisResult, LayoutKind};

/// Element kinds that never participate in layout: invisible components
/// and designer-tray artifacts from the source format.
const NON_VISUAL_KINDS: &[&str] = &[
    "timer",
    "tooltip",
    "imagelist",
    "mainmenu",
    "menustrip",
    "contextmenu",
    "contextmenustrip",
    "notifyicon",
    "errorprovider",
    "helpprovider",
    "bindingsource",
    "backgroundworker",
    "openfiledialog",
    "savefiledialog",
    "folderbrowserdialog",
    "colordialog",
    "fontdialog",
    "printdialog",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutOptions {
    /// Maximum coordinate distance treated as "the same line", in source
    /// coordinate units.
    pub tolerance: i32,
    /// Winning candidates below this percentage fall back to
    /// free-positioned layout.
    pub confidence_threshold: u8,
    /// Skip all heuristics and classify everything as free-positioned.
    pub force_free: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            tolerance: 8,
            confidence_threshold: 60,
            force_free: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    kind: LayoutKind,
    confidence: u8,
    metadata: BTreeMap<String, String>,
    justification: String,
}

/// Classifies `container`'s direct children, recursing into every eligible
/// child that is itself a container.
pub fn analyze(container: &ControlNode, options: &LayoutOptions) -> LayoutAnalysisResult {
    if options.force_free {
        return LayoutAnalysisResult::free_positioned("free-positioned layout forced by caller");
    }

    let eligible: Vec<&ControlNode> = container
        .children
        .iter()
        .filter(|c| is_layout_eligible(c))
        .collect();
    if eligible.is_empty() {
        return LayoutAnalysisResult::free_positioned("no eligible children");
    }

    // Fixed order; equal scores resolve in favor of the earlier candidate.
    let candidates = [
        dock_candidate(&eligible),
        grid_candidate(&eligible, options.tolerance),
        stack_candidate(&eligible, options.tolerance),
    ];
    let mut best = &candidates[0];
    for candidate in &candidates[1..] {
        if candidate.confidence > best.confidence {
            best = candidate;
        }
    }

    if best.confidence < options.confidence_threshold {
        let mut result = LayoutAnalysisResult::free_positioned(format!(
            "best candidate {} scored {}, below threshold {}",
            best.kind, best.confidence, options.confidence_threshold
        ));
        result
            .metadata
            .insert("rejected_candidate".into(), best.kind.to_string());
        result
            .metadata
            .insert("rejected_confidence".into(), best.confidence.to_string());
        return result;
    }

    let mut result = LayoutAnalysisResult {
        kind: best.kind,
        confidence: best.confidence,
        metadata: best.metadata.clone(),
        justification: best.justification.clone(),
        children: BTreeMap::new(),
    };
    for child in eligible {
        if !child.children.is_empty() {
            result
                .children
                .insert(child.name.clone(), analyze(child, options));
        }
    }
    result
}

pub fn is_layout_eligible(node: &ControlNode) -> bool {
    let kind = node.kind.to_ascii_lowercase();
    !NON_VISUAL_KINDS.contains(&kind.as_str())
}

/// Greedy tolerance clustering: values join the first existing cluster
/// whose representative (the cluster's lowest value) is within `tolerance`,
/// otherwise they open a new cluster. Returns the representatives in
/// ascending order.
pub fn cluster(mut values: Vec<i32>, tolerance: i32) -> Vec<i32> {
    values.sort_unstable();
    let mut representatives: Vec<i32> = Vec::new();
    for value in values {
        if !representatives
            .iter()
            .any(|rep| (value - rep).abs() <= tolerance)
        {
            representatives.push(value);
        }
    }
    representatives
}

fn dock_candidate(eligible: &[&ControlNode]) -> Candidate {
    let docked = eligible.iter().filter(|c| c.dock_edge().is_some()).count();
    let confidence = percent(docked, eligible.len());
    let mut metadata = BTreeMap::new();
    metadata.insert("docked_children".into(), docked.to_string());
    Candidate {
        kind: LayoutKind::EdgeDocked,
        confidence,
        metadata,
        justification: format!(
            "{docked} of {} children declare a dock edge",
            eligible.len()
        ),
    }
}

fn grid_candidate(eligible: &[&ControlNode], tolerance: i32) -> Candidate {
    let points = positions(eligible);
    if points.len() < 2 {
        return Candidate {
            kind: LayoutKind::Grid,
            confidence: 0,
            metadata: BTreeMap::new(),
            justification: "fewer than 2 positioned children".into(),
        };
    }

    let columns = cluster(points.iter().map(|p| p.0).collect(), tolerance);
    let rows = cluster(points.iter().map(|p| p.1).collect(), tolerance);

    // Every point clusters somewhere, so membership alone cannot separate a
    // grid from scattered controls. A child counts as grid-aligned only
    // when its row holds one child per column and its column one child per
    // row, i.e. when its cell belongs to a complete grid.
    let mut row_members = vec![0usize; rows.len()];
    let mut column_members = vec![0usize; columns.len()];
    let cells: Vec<(usize, usize)> = points
        .iter()
        .map(|&(x, y)| {
            let col = nearest_index(&columns, x, tolerance);
            let row = nearest_index(&rows, y, tolerance);
            column_members[col] += 1;
            row_members[row] += 1;
            (row, col)
        })
        .collect();
    let aligned = cells
        .iter()
        .filter(|&&(row, col)| {
            row_members[row] == columns.len() && column_members[col] == rows.len()
        })
        .count();
    let confidence = percent(aligned, points.len());

    let mut metadata = BTreeMap::new();
    metadata.insert("rows".into(), rows.len().to_string());
    metadata.insert("columns".into(), columns.len().to_string());
    metadata.insert("aligned_children".into(), aligned.to_string());
    Candidate {
        kind: LayoutKind::Grid,
        confidence,
        metadata,
        justification: format!(
            "{aligned} of {} positioned children align to a {}x{} grid",
            points.len(),
            rows.len(),
            columns.len()
        ),
    }
}

fn stack_candidate(eligible: &[&ControlNode], tolerance: i32) -> Candidate {
    let points = positions(eligible);
    if points.len() < 2 {
        return Candidate {
            kind: LayoutKind::LinearStack,
            confidence: 0,
            metadata: BTreeMap::new(),
            justification: "fewer than 2 positioned children".into(),
        };
    }

    let mut by_row = points.clone();
    by_row.sort_unstable_by_key(|&(x, y)| (y, x));
    let vertical = aligned_adjacent_pairs(&by_row, tolerance, |&(x, _)| x);

    let mut by_column = points.clone();
    by_column.sort_unstable_by_key(|&(x, y)| (x, y));
    let horizontal = aligned_adjacent_pairs(&by_column, tolerance, |&(_, y)| y);

    let best = vertical.max(horizontal);
    let confidence = percent(best, points.len() - 1);
    // A tie favors the vertical orientation.
    let orientation = if vertical >= horizontal {
        "vertical"
    } else {
        "horizontal"
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("orientation".into(), orientation.into());
    metadata.insert("aligned_pairs".into(), best.to_string());
    Candidate {
        kind: LayoutKind::LinearStack,
        confidence,
        metadata,
        justification: format!(
            "{best} of {} adjacent pairs align in a {orientation} stack",
            points.len() - 1
        ),
    }
}

/// Index of the representative `value` clustered into. Clustering
/// guarantees a match; the fallback index is never reached in practice.
fn nearest_index(representatives: &[i32], value: i32, tolerance: i32) -> usize {
    representatives
        .iter()
        .position(|rep| (value - rep).abs() <= tolerance)
        .unwrap_or(0)
}

fn positions(eligible: &[&ControlNode]) -> Vec<(i32, i32)> {
    eligible.iter().filter_map(|c| c.position()).collect()
}

fn aligned_adjacent_pairs(
    sorted: &[(i32, i32)],
    tolerance: i32,
    axis: impl Fn(&(i32, i32)) -> i32,
) -> usize {
    sorted
        .windows(2)
        .filter(|pair| (axis(&pair[1]) - axis(&pair[0])).abs() <= tolerance)
        .count()
}

/// Integer percentage, truncating the division.
fn percent(numerator: usize, denominator: usize) -> u8 {
    if denominator == 0 {
        return 0;
    }
    (numerator * 100 / denominator) as u8
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
