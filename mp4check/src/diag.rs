//! Diagnostic findings and the box-path label attached to each of them.

use std::fmt;

use derive_more::Display;

use crate::parse::BoxType;

/// How serious a finding is.
///
/// Only errors affect the process exit status; warnings are informational.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Severity {
    /// A specification violation.
    #[display(fmt = "error")]
    Error,
    /// Legal but suspect, or a violation the original tooling tolerates.
    #[display(fmt = "warning")]
    Warning,
}

/// The broad class of a finding, for programmatic matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindingKind {
    /// A field value failed its constraint; decoding continued.
    FieldConstraint,
    /// A box appeared that its parent does not know.
    UnknownBox,
    /// A must-have/at-most-one/must-be-first rule was violated.
    Cardinality,
    /// A scoped descriptor or NAL unit finished with unconsumed bits.
    TrailingData,
    /// Sample-data chunks of different tracks overlap in the file.
    ChunkOverlap,
    /// Anything else: cross-table mismatches, layout problems.
    Other,
}

/// One diagnostic produced during validation.
#[derive(Clone, Debug)]
pub struct Finding {
    /// Error or warning.
    pub severity: Severity,
    /// The broad class of the finding.
    pub kind: FindingKind,
    /// The box path at the point the finding was recorded, e.g. `moov-1:trak-2:mdia-1`.
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

/// The sink collecting findings, with the current box-path stack.
#[derive(Debug, Default)]
pub struct Diagnostics {
    findings: Vec<Finding>,
    path: Vec<PathSegment>,
}

#[derive(Clone, Copy, Debug)]
struct PathSegment {
    box_type: BoxType,
    index: u32,
}

//
// Finding impls
//

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.path, self.message)
        }
    }
}

//
// Diagnostics impls
//

impl Diagnostics {
    /// Record an error finding at the current box path.
    pub fn error(&mut self, kind: FindingKind, message: impl Into<String>) {
        self.record(Severity::Error, kind, message.into());
    }

    /// Record a warning finding at the current box path.
    pub fn warning(&mut self, kind: FindingKind, message: impl Into<String>) {
        self.record(Severity::Warning, kind, message.into());
    }

    /// Push a `type-index` segment onto the box path.
    pub fn push_path(&mut self, box_type: BoxType, index: u32) {
        self.path.push(PathSegment { box_type, index });
    }

    /// Pop the innermost box-path segment.
    pub fn pop_path(&mut self) {
        self.path.pop();
    }

    /// Render the current box path, e.g. `moov-1:trak-2`.
    pub fn current_path(&self) -> String {
        let mut path = String::new();
        for (i, segment) in self.path.iter().enumerate() {
            if i > 0 {
                path.push(':');
            }
            path.push_str(&format!("{}-{}", segment.box_type, segment.index));
        }
        path
    }

    /// The current box-path depth, used to indent trace output.
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// All findings recorded so far.
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Consume the sink, returning the findings.
    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    /// Whether any error-severity finding was recorded.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|finding| finding.severity == Severity::Error)
    }

    fn record(&mut self, severity: Severity, kind: FindingKind, message: String) {
        let finding = Finding { severity, kind, path: self.current_path(), message };
        log::debug!("{finding}");
        self.findings.push(finding);
    }
}

#[cfg(test)]
mod test {
    use crate::parse::BoxType;

    use super::*;

    #[test]
    fn path_rendering() {
        let mut diags = Diagnostics::default();
        diags.push_path(BoxType::MOOV, 1);
        diags.push_path(BoxType::TRAK, 2);
        assert_eq!(diags.current_path(), "moov-1:trak-2");
        diags.pop_path();
        assert_eq!(diags.current_path(), "moov-1");
    }

    #[test]
    fn findings_carry_path_and_severity() {
        let mut diags = Diagnostics::default();
        diags.push_path(BoxType::MOOV, 1);
        diags.warning(FindingKind::UnknownBox, "unknown movie box");
        diags.pop_path();
        diags.error(FindingKind::Cardinality, "no ftyp");

        assert!(diags.has_errors());
        assert_eq!(diags.findings().len(), 2);
        assert_eq!(diags.findings()[0].path, "moov-1");
        assert_eq!(diags.findings()[1].path, "");
    }
}
