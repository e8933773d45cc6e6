//! Line bookkeeping between a generated translation unit and the submission.
//!
//! Each region of the generated file restarts numbering at 1 under its own
//! `#line` tag, so a compiler location is `(tag, region-local line)`. The map
//! records, per region, which original submission line every region-local
//! line came from.

use serde::{Deserialize, Serialize};

/// Partition of a generated translation unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// `#include` lines hoisted out of the submission.
    Include,
    /// Everything else, placed inside the generated `main`.
    Body,
    /// Generated code the user never wrote.
    Scaffold,
}

impl RegionKind {
    /// The file name used in this region's `#line` directive.
    pub fn tag(&self) -> &'static str {
        match self {
            RegionKind::Include => "_user_code_include_",
            RegionKind::Body => "_user_code_main_",
            RegionKind::Scaffold => "_cppshell_scaffold_",
        }
    }

    /// Inverse of [`RegionKind::tag`]. Unknown names are not ours.
    pub fn from_tag(tag: &str) -> Option<Self> {
        [RegionKind::Include, RegionKind::Body, RegionKind::Scaffold]
            .into_iter()
            .find(|kind| kind.tag() == tag)
    }

    /// Whether diagnostics in this region belong to the user.
    pub fn is_user_code(&self) -> bool {
        !matches!(self, RegionKind::Scaffold)
    }
}

/// One region's original line numbers, indexed by region-local line - 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    original_lines: Vec<u32>,
    /// Original line preceding the region; anchors lookups into an empty region.
    base: u32,
}

impl Region {
    pub fn len(&self) -> usize {
        self.original_lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original_lines.is_empty()
    }

    pub fn original_lines(&self) -> &[u32] {
        &self.original_lines
    }

    /// Map a region-local line to the submission. Lines past the end of the
    /// region (e.g. `main`'s closing brace) land on the region's last line, so
    /// a reported line always exists in the submission.
    fn resolve(&self, local: u32) -> Option<u32> {
        if local == 0 {
            return None;
        }
        let index = (local - 1) as usize;
        if let Some(original) = self.original_lines.get(index) {
            return Some(*original);
        }
        let anchor = self.original_lines.last().copied().unwrap_or(self.base);
        Some(anchor.max(1))
    }
}

/// Region-local → original line table for one translation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineMap {
    include: Region,
    body: Region,
}

impl LineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next submission line as belonging to `kind`.
    pub fn push(&mut self, kind: RegionKind, original_line: u32) {
        match kind {
            RegionKind::Include => self.include.original_lines.push(original_line),
            RegionKind::Body => self.body.original_lines.push(original_line),
            RegionKind::Scaffold => {}
        }
    }

    /// Close the map once all lines are pushed. An empty body region anchors
    /// after the last include line.
    pub(crate) fn finish(&mut self) {
        if self.body.is_empty() {
            self.body.base = self.include.original_lines.last().copied().unwrap_or(0);
        }
    }

    pub fn region(&self, kind: RegionKind) -> Option<&Region> {
        match kind {
            RegionKind::Include => Some(&self.include),
            RegionKind::Body => Some(&self.body),
            RegionKind::Scaffold => None,
        }
    }

    pub fn include_line_count(&self) -> usize {
        self.include.len()
    }

    /// Submission line for a compiler location, or `None` if the location is
    /// not attributable to the user.
    pub fn resolve(&self, tag: &str, line: u32) -> Option<u32> {
        match RegionKind::from_tag(tag)? {
            RegionKind::Include => self.include.resolve(line),
            RegionKind::Body => self.body.resolve(line),
            RegionKind::Scaffold => None,
        }
    }
}
