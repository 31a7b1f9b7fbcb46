//! Utility functions

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A run of consecutive entries of a selection, addressed by selection index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Index of the first selected entry in the run
    pub first: usize,
    /// Number of selected entries in the run
    pub len: usize,
}

impl Run {
    pub fn last(&self) -> usize {
        self.first + self.len - 1
    }
}

/// Split a sequence of on-disk numbers into runs that can each be served by one read.
///
/// A run continues while numbers increase and the hole between neighbours is at most
/// `max_gap` elements; `max_gap == 0` yields strictly contiguous runs.
pub fn coalesce_runs(values: &[u32], max_gap: u32) -> Vec<Run> {
    let mut runs = Vec::new();
    let Some(&head) = values.first() else {
        return runs;
    };

    let mut current = Run { first: 0, len: 1 };
    let mut previous = head;
    for (index, &value) in values.iter().enumerate().skip(1) {
        let joins = value > previous && value - previous - 1 <= max_gap;
        if joins {
            current.len += 1;
        } else {
            runs.push(current);
            current = Run {
                first: index,
                len: 1,
            };
        }
        previous = value;
    }
    runs.push(current);
    runs
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Unique path for a temporary backing store inside `dir`
pub fn temporary_store_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}-{}.raw", prefix, Uuid::new_v4().simple()))
}
