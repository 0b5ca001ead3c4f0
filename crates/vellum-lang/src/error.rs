use miette::Diagnostic;
use serde::Serialize;
use smol_str::SmolStr;
use std::fmt::{self, Display};

/// The global budget a template exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Nodes,
    Depth,
    Bytes,
}

impl Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Nodes => write!(f, "node count"),
            Limit::Depth => write!(f, "nesting depth"),
            Limit::Bytes => write!(f, "size in bytes"),
        }
    }
}

/// Fatal compilation errors. No partial output is produced for either.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Diagnostic, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateError {
    #[error("Template is too complex: {limit} is {actual}, the maximum is {max}")]
    #[diagnostic(
        code(vellum::template::too_complex),
        help("Split the layout into fewer elements or reduce nesting.")
    )]
    TooComplex {
        limit: Limit,
        actual: usize,
        max: usize,
    },
    #[error("Template could not be read: {message}")]
    #[diagnostic(
        code(vellum::template::malformed),
        help("Template source must be UTF-8 text, and custom tags must close inside the element that contains them.")
    )]
    Malformed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnknownTag,
    TagNotAllowedInMode,
    DisallowedAttribute,
    EventHandler,
    DisallowedUri,
    UnknownProp,
    InvalidProp,
    MissingProp,
    MisplacedBranch,
    IgnoredChildren,
    DataPathUnresolved,
}

impl Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::UnknownTag => "UnknownTag",
            ViolationKind::TagNotAllowedInMode => "TagNotAllowedInMode",
            ViolationKind::DisallowedAttribute => "DisallowedAttribute",
            ViolationKind::EventHandler => "EventHandler",
            ViolationKind::DisallowedUri => "DisallowedUri",
            ViolationKind::UnknownProp => "UnknownProp",
            ViolationKind::InvalidProp => "InvalidProp",
            ViolationKind::MissingProp => "MissingProp",
            ViolationKind::MisplacedBranch => "MisplacedBranch",
            ViolationKind::IgnoredChildren => "IgnoredChildren",
            ViolationKind::DataPathUnresolved => "DataPathUnresolved",
        };
        write!(f, "{}", name)
    }
}

/// A non-fatal finding. The offending content was dropped or coerced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub tag: SmolStr,
    pub detail: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, tag: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            tag: SmolStr::new(tag),
            detail: detail.into(),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>: {}", self.kind, self.tag, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::nodes(
        TemplateError::TooComplex { limit: Limit::Nodes, actual: 12, max: 10 },
        "Template is too complex: node count is 12, the maximum is 10"
    )]
    #[case::malformed(
        TemplateError::Malformed { message: "invalid utf-8".to_string() },
        "Template could not be read: invalid utf-8"
    )]
    fn test_template_error_display(#[case] error: TemplateError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation::new(ViolationKind::UnknownTag, "script", "element removed");
        assert_eq!(violation.to_string(), "UnknownTag <script>: element removed");
    }
}
