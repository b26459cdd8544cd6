use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of layout strategies a container can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    FreePositioned,
    Grid,
    LinearStack,
    EdgeDocked,
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutKind::FreePositioned => "free-positioned",
            LayoutKind::Grid => "grid",
            LayoutKind::LinearStack => "linear-stack",
            LayoutKind::EdgeDocked => "edge-docked",
        };
        f.write_str(name)
    }
}

/// Classification of one container's direct children.
///
/// `confidence` is an integer percentage in 0..=100. `children` carries the
/// nested result for every layout-eligible child that is itself a
/// container, keyed by the child's display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutAnalysisResult {
    pub kind: LayoutKind,
    pub confidence: u8,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub justification: String,
    #[serde(default)]
    pub children: BTreeMap<String, LayoutAnalysisResult>,
}

impl LayoutAnalysisResult {
    pub fn free_positioned(justification: impl Into<String>) -> Self {
        Self {
            kind: LayoutKind::FreePositioned,
            confidence: 100,
            metadata: BTreeMap::new(),
            justification: justification.into(),
            children: BTreeMap::new(),
        }
    }
}
