use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use super::models::{DetectionResult, TechnologyTag};
use crate::error::DetectionError;

/// Version-control and dependency-cache directories never scanned.
pub const EXCLUDED_DIRS: &[&str] = &[".git", ".hg", ".svn", "node_modules", "__pycache__"];

/// ProjectDetector - 파일 트리에서 기술 스택 감지
///
/// 파일 이름만 보고 판단한다 (내용은 읽지 않음).
#[derive(Debug, Clone, Default)]
pub struct ProjectDetector;

impl ProjectDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect technology tags and count regular files under `root`.
    ///
    /// Unreadable entries are recorded in `skipped` and otherwise ignored.
    pub fn detect(&self, root: &Path) -> DetectionResult {
        let mut seen: HashSet<TechnologyTag> = HashSet::new();
        let mut file_count = 0usize;
        let mut skipped = Vec::new();

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_str()
                        .map(|name| EXCLUDED_DIRS.contains(&name))
                        .unwrap_or(false)
            })
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable path during detection");
                    skipped.push(DetectionError {
                        path: err_path(&err).map(|p| p.to_path_buf()),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            file_count += 1;

            let name = entry.file_name().to_string_lossy().to_lowercase();
            if let Some(tag) = TechnologyTag::from_marker(&name) {
                if seen.insert(tag) {
                    debug!(tag = %tag, path = %entry.path().display(), "Marker file found");
                }
            }
        }

        let tags = TechnologyTag::ALL
            .into_iter()
            .filter(|tag| seen.contains(tag))
            .collect();

        DetectionResult {
            tags,
            file_count,
            skipped,
        }
    }
}

fn err_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } => err_path(err),
        ignore::Error::WithLineNumber { err, .. } => err_path(err),
        _ => None,
    }
}
