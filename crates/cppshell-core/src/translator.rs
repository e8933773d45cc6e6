//! Submission → translation unit.
//!
//! Include directives are hoisted to file scope; every other line goes into a
//! generated `main`. Each region is introduced by a `#line 1 "<tag>"` marker so
//! the compiler reports region-local positions that [`LineMap`] can map back.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::line_map::{LineMap, RegionKind};

static INCLUDE_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*include\b").expect("include pattern is valid"));

/// Fixed code between the include region and the user's body.
const SCAFFOLD_PRELUDE: &[&str] = &[
    "#include <iostream>",
    "using namespace std;",
    "int main(int argc, char* argv[])",
    "{",
];

/// Compiler-ready text plus the table to map diagnostics back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationUnit {
    pub text: String,
    pub line_map: LineMap,
}

impl TranslationUnit {
    pub fn include_line_count(&self) -> usize {
        self.line_map.include_line_count()
    }
}

/// Whether a submission line is routed to the include region.
pub fn is_include_line(line: &str) -> bool {
    INCLUDE_DIRECTIVE.is_match(line)
}

/// Rewrite a raw submission into a compilable translation unit.
pub fn translate(source: &str) -> TranslationUnit {
    let mut includes = Vec::new();
    let mut body = Vec::new();
    let mut line_map = LineMap::new();

    for (index, line) in source.lines().enumerate() {
        let original = index as u32 + 1;
        if is_include_line(line) {
            includes.push(line);
            line_map.push(RegionKind::Include, original);
        } else {
            body.push(line);
            line_map.push(RegionKind::Body, original);
        }
    }
    line_map.finish();

    let mut text = String::with_capacity(source.len() + 256);
    push_marker(&mut text, RegionKind::Include);
    push_lines(&mut text, &includes);
    push_marker(&mut text, RegionKind::Scaffold);
    push_lines(&mut text, SCAFFOLD_PRELUDE);
    push_marker(&mut text, RegionKind::Body);
    push_lines(&mut text, &body);
    text.push_str("}\n");

    TranslationUnit { text, line_map }
}

fn push_marker(text: &mut String, kind: RegionKind) {
    text.push_str("#line 1 \"");
    text.push_str(kind.tag());
    text.push_str("\"\n");
}

fn push_lines(text: &mut String, lines: &[&str]) {
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
}
