use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::LazyLock;

/// Profile-level setting for how site styles apply to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CssIsolationMode {
    #[default]
    Inherit,
    Override,
    Disable,
}

impl FromStr for CssIsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inherit" => Ok(CssIsolationMode::Inherit),
            "override" => Ok(CssIsolationMode::Override),
            "disable" => Ok(CssIsolationMode::Disable),
            other => Err(format!("unknown css isolation mode '{}'", other)),
        }
    }
}

impl Display for CssIsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CssIsolationMode::Inherit => write!(f, "inherit"),
            CssIsolationMode::Override => write!(f, "override"),
            CssIsolationMode::Disable => write!(f, "disable"),
        }
    }
}

/// How each rendered component is styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentCssRenderMode {
    Inherit,
    Custom,
    #[default]
    Auto,
}

impl Display for ComponentCssRenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentCssRenderMode::Inherit => write!(f, "inherit"),
            ComponentCssRenderMode::Custom => write!(f, "custom"),
            ComponentCssRenderMode::Auto => write!(f, "auto"),
        }
    }
}

/// Profiles edited in the visual builder always carry builder styles, so
/// an inheriting profile still renders components in custom mode.
pub fn component_css_mode(mode: CssIsolationMode, visual_builder: bool) -> ComponentCssRenderMode {
    match (mode, visual_builder) {
        (CssIsolationMode::Inherit, true) => ComponentCssRenderMode::Custom,
        (CssIsolationMode::Inherit, false) => ComponentCssRenderMode::Inherit,
        (CssIsolationMode::Override, _) => ComponentCssRenderMode::Custom,
        (CssIsolationMode::Disable, _) => ComponentCssRenderMode::Auto,
    }
}

/// Same as [`component_css_mode`] for a stored string. Anything unrecognised
/// maps to `Auto`.
pub fn component_css_mode_from_str(raw: &str, visual_builder: bool) -> ComponentCssRenderMode {
    raw.parse::<CssIsolationMode>()
        .map(|mode| component_css_mode(mode, visual_builder))
        .unwrap_or_default()
}

pub const KNOWN_PATTERNS: &[&str] = &[
    "dots", "grid", "stripes", "checker", "waves", "zigzag", "hearts", "stars",
];

static PATTERN_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:\.bg-pattern-|--vellum-pattern-)([a-z][a-z0-9-]*)").ok()
});

/// A full-page background pattern that has to sit on the document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternHoist {
    pub pattern: String,
    pub class_name: String,
}

/// Scans stylesheet text for the first known pattern marker.
pub fn detect_full_page_pattern(css: &str) -> Option<PatternHoist> {
    let re = PATTERN_MARKER.as_ref()?;

    re.captures_iter(css)
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str())
        .find(|name| KNOWN_PATTERNS.contains(name))
        .map(|name| PatternHoist {
            pattern: name.to_string(),
            class_name: format!("bg-pattern-{}", name),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CssIsolationMode::Inherit, false, ComponentCssRenderMode::Inherit)]
    #[case(CssIsolationMode::Override, false, ComponentCssRenderMode::Custom)]
    #[case(CssIsolationMode::Disable, false, ComponentCssRenderMode::Auto)]
    #[case(CssIsolationMode::Inherit, true, ComponentCssRenderMode::Custom)]
    #[case(CssIsolationMode::Override, true, ComponentCssRenderMode::Custom)]
    #[case(CssIsolationMode::Disable, true, ComponentCssRenderMode::Auto)]
    fn test_component_css_mode(
        #[case] mode: CssIsolationMode,
        #[case] visual_builder: bool,
        #[case] expected: ComponentCssRenderMode,
    ) {
        assert_eq!(component_css_mode(mode, visual_builder), expected);
    }

    #[rstest]
    #[case::known("Override", ComponentCssRenderMode::Custom)]
    #[case::unknown("isolate", ComponentCssRenderMode::Auto)]
    #[case::empty("", ComponentCssRenderMode::Auto)]
    fn test_component_css_mode_from_str(#[case] raw: &str, #[case] expected: ComponentCssRenderMode) {
        assert_eq!(component_css_mode_from_str(raw, false), expected);
    }

    #[rstest]
    #[case::class(".profile { } .bg-pattern-dots { opacity: 1 }", Some("dots"))]
    #[case::variable(":root { --vellum-pattern-waves: 1; }", Some("waves"))]
    #[case::unknown_first(".bg-pattern-plaid {} .bg-pattern-grid {}", Some("grid"))]
    #[case::unknown(".bg-pattern-plaid {}", None)]
    #[case::none("body { color: red }", None)]
    fn test_detect_full_page_pattern(#[case] css: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            detect_full_page_pattern(css).map(|hoist| hoist.pattern),
            expected.map(str::to_string)
        );
    }

    #[test]
    fn test_hoist_class_name() {
        let hoist = detect_full_page_pattern(".bg-pattern-stars{}").unwrap();
        assert_eq!(hoist.class_name, "bg-pattern-stars");
    }
}
