use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TechnologyTag {
    Node,
    Python,
    Java,
    Go,
    Rust,
    Docker,
}

impl TechnologyTag {
    /// Marker precedence. Detected tags are reported in this order.
    pub const ALL: [TechnologyTag; 6] = [
        TechnologyTag::Node,
        TechnologyTag::Python,
        TechnologyTag::Java,
        TechnologyTag::Go,
        TechnologyTag::Rust,
        TechnologyTag::Docker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TechnologyTag::Node => "node",
            TechnologyTag::Python => "python",
            TechnologyTag::Java => "java",
            TechnologyTag::Go => "go",
            TechnologyTag::Rust => "rust",
            TechnologyTag::Docker => "docker",
        }
    }

    /// Matches a lower-cased file name against the marker table.
    pub fn from_marker(file_name: &str) -> Option<Self> {
        match file_name {
            "package.json" => Some(TechnologyTag::Node),
            "requirements.txt" | "pyproject.toml" => Some(TechnologyTag::Python),
            "pom.xml" | "build.gradle" | "build.gradle.kts" => Some(TechnologyTag::Java),
            "go.mod" => Some(TechnologyTag::Go),
            "cargo.toml" => Some(TechnologyTag::Rust),
            "dockerfile" => Some(TechnologyTag::Docker),
            _ => None,
        }
    }
}

impl std::fmt::Display for TechnologyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TechnologyTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TechnologyTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| format!("Invalid technology tag: {}", s))
    }
}

/// Output of one detection pass. Never mutated after it is produced.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DetectionResult {
    #[serde(rename = "languages")]
    pub tags: Vec<TechnologyTag>,
    pub file_count: usize,
    #[serde(skip)]
    pub skipped: Vec<DetectionError>,
}

impl DetectionResult {
    pub fn has(&self, tag: TechnologyTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn tag_list(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
