//! Listing Filter and Diff Matcher
//!
//! Raw bucket listings are narrowed twice: a substring filter drops content
//! classes the caller does not want, and a regex matcher admits diff
//! archives whose block number falls in the requested half-open range.

use crate::sync::bucket::ObjectRef;
use regex::Regex;

/// Content classes dropped when micro-block data is excluded
pub const EXCLUDED_CONTENT_CLASSES: [&str; 4] =
    ["txEpochs", "txBodies", "microBlock", "minerInfo"];

/// Substring marking persistence diff archives in listings
const DIFF_MARKER: &str = "diff_persistence";

/// Policy applied to a raw listing (case-sensitive substring matches)
#[derive(Debug, Clone, Copy)]
pub struct ListingFilter {
    /// Keep `diff_persistence` entries (only the diff phase wants them)
    pub include_diffs: bool,
    /// Drop the micro-block content classes
    pub exclude_micro_blocks: bool,
}

impl ListingFilter {
    pub fn admits(&self, key: &str) -> bool {
        if !self.include_diffs && key.contains(DIFF_MARKER) {
            return false;
        }
        if self.exclude_micro_blocks
            && EXCLUDED_CONTENT_CLASSES.iter().any(|class| key.contains(class))
        {
            return false;
        }
        true
    }

    pub fn apply(&self, objects: Vec<ObjectRef>) -> Vec<ObjectRef> {
        objects.into_iter().filter(|o| self.admits(&o.key)).collect()
    }
}

/// Admits diff archives `<prefix><N>.tar.gz` with N in `[from, to)`
#[derive(Debug)]
pub struct DiffMatcher {
    pattern: Regex,
    from: u64,
    to: u64,
}

impl DiffMatcher {
    /// `from`/`to` are tx block numbers, half-open: `[start_tip + 1,
    /// new_tip + 1)`.
    pub fn new(file_name_prefix: &str, from: u64, to: u64) -> Self {
        let pattern = Regex::new(&format!(
            r"^.*/{}([0-9]+)\.tar\.gz$",
            regex::escape(file_name_prefix)
        ))
        .expect("diff archive pattern is a valid regex");
        DiffMatcher { pattern, from, to }
    }

    /// The admitted block number, or `None` when the key does not match
    /// the pattern or falls outside the range
    pub fn admits(&self, key: &str) -> Option<u64> {
        let captures = self.pattern.captures(key)?;
        let block: u64 = captures.get(1)?.as_str().parse().ok()?;
        (self.from <= block && block < self.to).then_some(block)
    }

    pub fn apply(&self, objects: Vec<ObjectRef>) -> Vec<ObjectRef> {
        objects
            .into_iter()
            .filter(|o| self.admits(&o.key).is_some())
            .collect()
    }
}
