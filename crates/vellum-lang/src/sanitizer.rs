use crate::config::ValidationConfig;
use crate::error::{Limit, TemplateError, Violation, ViolationKind};
use crate::registry::{ComponentDescriptor, ComponentRegistry};
use regex_lite::Regex;
use smol_str::SmolStr;
use std::sync::LazyLock;
use vellum_markup::{Attributes, Element, MAX_NESTING, ParsedTemplate, TemplateNode};

/// Bumped whenever an allowlist or URI rule changes.
pub const SANITIZER_RULES_VERSION: u16 = 3;

const GLOBAL_ATTRIBUTES: &[&str] = &["class", "id", "title", "lang", "dir", "role"];

const GLOBAL_ATTRIBUTE_PREFIXES: &[&str] = &["aria-", "data-"];

const URI_ATTRIBUTES: &[&str] = &["href", "src", "cite", "poster", "action", "background"];

/// Plain markup tags a template may use, with their tag-specific attributes.
const MARKUP_ALLOWLIST: &[(&str, &[&str])] = &[
    ("a", &["href", "target", "rel"]),
    ("abbr", &[]),
    ("article", &[]),
    ("aside", &[]),
    ("audio", &["src", "controls", "loop"]),
    ("b", &[]),
    ("blockquote", &["cite"]),
    ("br", &[]),
    ("caption", &[]),
    ("cite", &[]),
    ("code", &[]),
    ("dd", &[]),
    ("del", &[]),
    ("details", &["open"]),
    ("div", &[]),
    ("dl", &[]),
    ("dt", &[]),
    ("em", &[]),
    ("figcaption", &[]),
    ("figure", &[]),
    ("footer", &[]),
    ("h1", &[]),
    ("h2", &[]),
    ("h3", &[]),
    ("h4", &[]),
    ("h5", &[]),
    ("h6", &[]),
    ("header", &[]),
    ("hr", &[]),
    ("i", &[]),
    ("img", &["src", "alt", "width", "height", "loading"]),
    ("ins", &[]),
    ("kbd", &[]),
    ("li", &[]),
    ("main", &[]),
    ("mark", &[]),
    ("nav", &[]),
    ("ol", &["start", "reversed", "type"]),
    ("p", &[]),
    ("pre", &[]),
    ("q", &["cite"]),
    ("s", &[]),
    ("section", &[]),
    ("small", &[]),
    ("source", &["src", "type"]),
    ("span", &[]),
    ("strong", &[]),
    ("sub", &[]),
    ("summary", &[]),
    ("sup", &[]),
    ("table", &[]),
    ("tbody", &[]),
    ("td", &["colspan", "rowspan"]),
    ("tfoot", &[]),
    ("th", &["colspan", "rowspan", "scope"]),
    ("thead", &[]),
    ("time", &["datetime"]),
    ("tr", &[]),
    ("u", &[]),
    ("ul", &[]),
    ("video", &["src", "poster", "controls", "loop", "muted", "width", "height"]),
];

static SAFE_DATA_URI: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^data:image/(png|jpeg|gif|webp);base64,[A-Za-z0-9+/]+={0,2}$").ok()
});

pub fn markup_attributes(tag: &str) -> Option<&'static [&'static str]> {
    MARKUP_ALLOWLIST
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, attrs)| *attrs)
}

pub fn is_event_handler(name: &str) -> bool {
    name.len() > 2 && name.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("on"))
}

/// Accepts https, mailto, relative references, fragments and base64 images
/// of a few raster types. Control characters and whitespace are stripped
/// first, as browsers do, so `java\tscript:` is still recognised.
pub fn is_safe_uri(value: &str) -> bool {
    let cleaned = value
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace())
        .collect::<String>();
    let lowered = cleaned.to_ascii_lowercase();

    if lowered.is_empty() || lowered.starts_with('#') {
        return true;
    }

    // `//host/path` inherits the page's scheme and leaves the site. Browsers
    // read `\` as `/` here.
    let mut leading = lowered.chars();
    if matches!(
        (leading.next(), leading.next()),
        (Some('/' | '\\'), Some('/' | '\\'))
    ) {
        return false;
    }

    let scheme_end = lowered.find(':');
    let path_start = lowered.find(['/', '?', '#']);

    match (scheme_end, path_start) {
        (None, _) => true,
        (Some(colon), Some(slash)) if slash < colon => true,
        (Some(colon), _) => match &lowered[..colon] {
            "https" | "mailto" => true,
            "data" => SAFE_DATA_URI
                .as_ref()
                .is_some_and(|re| re.is_match(&cleaned)),
            _ => false,
        },
    }
}

/// Output of a successful sanitization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub tree: TemplateNode,
    pub violations: Vec<Violation>,
}

pub struct Sanitizer<'a> {
    registry: &'a ComponentRegistry,
    config: ValidationConfig,
}

impl<'a> Sanitizer<'a> {
    pub fn new(registry: &'a ComponentRegistry, config: ValidationConfig) -> Self {
        Self { registry, config }
    }

    /// Applies the allowlists to a parsed tree and enforces the node and
    /// depth budgets. Exceeding a budget rejects the whole template.
    pub fn sanitize(&self, parsed: &ParsedTemplate) -> Result<Sanitized, TemplateError> {
        self.check_budgets(parsed)?;
        self.check_nesting(parsed)?;

        let mut violations = Vec::new();
        let children = self.sanitize_children(parsed.root.children(), &mut violations);

        Ok(Sanitized {
            tree: TemplateNode::root(children),
            violations,
        })
    }

    /// A gate whose content the markup around it moved elsewhere cannot be
    /// trusted to hide that content, so the template is rejected.
    fn check_nesting(&self, parsed: &ParsedTemplate) -> Result<(), TemplateError> {
        let Some(tag) = parsed.misnested.first() else {
            return Ok(());
        };
        let name = self
            .registry
            .get(tag)
            .map_or(tag.as_str(), |descriptor| descriptor.tag_name);

        Err(TemplateError::Malformed {
            message: format!(
                "<{}> is not closed inside the element that contains it",
                name
            ),
        })
    }

    fn check_budgets(&self, parsed: &ParsedTemplate) -> Result<(), TemplateError> {
        let max_depth = self.config.effective_max_depth();

        if parsed.depth_exceeded {
            return Err(TemplateError::TooComplex {
                limit: Limit::Depth,
                actual: MAX_NESTING + 1,
                max: max_depth,
            });
        }

        let depth = parsed.root.depth().saturating_sub(1);
        if depth > max_depth {
            return Err(TemplateError::TooComplex {
                limit: Limit::Depth,
                actual: depth,
                max: max_depth,
            });
        }

        let nodes = parsed.root.node_count() - 1;
        if nodes > self.config.max_nodes {
            return Err(TemplateError::TooComplex {
                limit: Limit::Nodes,
                actual: nodes,
                max: self.config.max_nodes,
            });
        }

        Ok(())
    }

    fn sanitize_children(
        &self,
        children: &[TemplateNode],
        violations: &mut Vec<Violation>,
    ) -> Vec<TemplateNode> {
        children
            .iter()
            .filter_map(|child| self.sanitize_node(child, violations))
            .collect()
    }

    fn sanitize_node(
        &self,
        node: &TemplateNode,
        violations: &mut Vec<Violation>,
    ) -> Option<TemplateNode> {
        let element = match node {
            TemplateNode::Text(text) => return Some(TemplateNode::Text(text.clone())),
            TemplateNode::Element(element) => element,
        };

        let attributes = if let Some(allowed) = markup_attributes(&element.tag) {
            self.sanitize_markup_attributes(element, allowed, violations)
        } else if let Some(descriptor) = self.registry.get(&element.tag) {
            if descriptor.min_mode > self.config.mode {
                violations.push(Violation::new(
                    ViolationKind::TagNotAllowedInMode,
                    descriptor.tag_name,
                    format!(
                        "requires {} templates, this profile uses {}",
                        descriptor.min_mode, self.config.mode
                    ),
                ));
                return None;
            }
            self.sanitize_props(element, descriptor, violations)
        } else {
            violations.push(Violation::new(
                ViolationKind::UnknownTag,
                &element.tag,
                "element and its contents removed",
            ));
            return None;
        };

        Some(TemplateNode::Element(Element {
            tag: element.tag.clone(),
            attributes,
            children: self.sanitize_children(&element.children, violations),
        }))
    }

    fn sanitize_markup_attributes(
        &self,
        element: &Element,
        allowed: &[&str],
        violations: &mut Vec<Violation>,
    ) -> Attributes {
        let mut attributes = Attributes::new();

        for (name, value) in &element.attributes {
            if is_event_handler(name) {
                violations.push(Violation::new(
                    ViolationKind::EventHandler,
                    &element.tag,
                    format!("\"{}\" removed", name),
                ));
                continue;
            }

            let permitted = allowed.contains(&name.as_str())
                || GLOBAL_ATTRIBUTES.contains(&name.as_str())
                || GLOBAL_ATTRIBUTE_PREFIXES
                    .iter()
                    .any(|prefix| name.starts_with(prefix));

            if !permitted {
                violations.push(Violation::new(
                    ViolationKind::DisallowedAttribute,
                    &element.tag,
                    format!("\"{}\" removed", name),
                ));
                continue;
            }

            if URI_ATTRIBUTES.contains(&name.as_str()) && !is_safe_uri(value) {
                violations.push(Violation::new(
                    ViolationKind::DisallowedUri,
                    &element.tag,
                    format!("\"{}\" removed, scheme not allowed", name),
                ));
                continue;
            }

            attributes.insert(name.clone(), value.clone());
        }

        if attributes.contains_key("target") {
            attributes.insert(SmolStr::new_static("rel"), "noopener noreferrer".to_string());
        }

        attributes
    }

    fn sanitize_props(
        &self,
        element: &Element,
        descriptor: &ComponentDescriptor,
        violations: &mut Vec<Violation>,
    ) -> Attributes {
        let mut attributes = Attributes::new();

        for (name, value) in &element.attributes {
            if is_event_handler(name) {
                violations.push(Violation::new(
                    ViolationKind::EventHandler,
                    descriptor.tag_name,
                    format!("\"{}\" removed", name),
                ));
                continue;
            }

            match descriptor.prop(name) {
                Some(schema) => {
                    attributes.insert(SmolStr::new_static(schema.name), value.clone());
                }
                None => violations.push(Violation::new(
                    ViolationKind::UnknownProp,
                    descriptor.tag_name,
                    format!("\"{}\" is not a prop of {}", name, descriptor.tag_name),
                )),
            }
        }

        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateMode;
    use rstest::rstest;
    use vellum_markup::parse_with_components;

    fn parse(source: &str) -> ParsedTemplate {
        parse_with_components(source, ComponentRegistry::builtin().tag_names())
    }

    fn sanitize(source: &str) -> Result<Sanitized, TemplateError> {
        sanitize_with(source, ValidationConfig::default())
    }

    fn sanitize_with(source: &str, config: ValidationConfig) -> Result<Sanitized, TemplateError> {
        Sanitizer::new(ComponentRegistry::builtin(), config).sanitize(&parse(source))
    }

    fn kinds(sanitized: &Sanitized) -> Vec<ViolationKind> {
        sanitized.violations.iter().map(|v| v.kind).collect()
    }

    #[rstest]
    #[case::https("https://example.com/a", true)]
    #[case::mailto("mailto:me@example.com", true)]
    #[case::relative("/posts/1", true)]
    #[case::relative_with_colon("/a:b", true)]
    #[case::relative_backslash("\\posts", true)]
    #[case::protocol_relative("//evil.example/x", false)]
    #[case::protocol_relative_padded(" /\t/evil.example", false)]
    #[case::protocol_relative_backslash("\\\\evil.example", false)]
    #[case::protocol_relative_mixed("/\\evil.example", false)]
    #[case::fragment("#top", true)]
    #[case::empty("", true)]
    #[case::http("http://example.com", false)]
    #[case::javascript("javascript:alert(1)", false)]
    #[case::javascript_upper("JaVaScRiPt:alert(1)", false)]
    #[case::javascript_tab("java\tscript:alert(1)", false)]
    #[case::javascript_padded("  javascript:alert(1)", false)]
    #[case::javascript_control("\u{0001}javascript:alert(1)", false)]
    #[case::vbscript("vbscript:msgbox", false)]
    #[case::data_png("data:image/png;base64,iVBORw0KGgo=", true)]
    #[case::data_svg("data:image/svg+xml;base64,PHN2Zz4=", false)]
    #[case::data_html("data:text/html,<script>alert(1)</script>", false)]
    fn test_is_safe_uri(#[case] uri: &str, #[case] expected: bool) {
        assert_eq!(is_safe_uri(uri), expected);
    }

    #[rstest]
    #[case("onclick", true)]
    #[case("ONLOAD", true)]
    #[case("on", false)]
    #[case("open", false)]
    #[case("onerror", true)]
    #[case("class", false)]
    fn test_is_event_handler(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_event_handler(name), expected);
    }

    #[test]
    fn test_script_is_dropped_with_warning() {
        let sanitized = sanitize("<script>alert(1)</script><p>hi</p>").unwrap();
        assert_eq!(sanitized.tree.to_markup(), "<p>hi</p>");
        assert_eq!(kinds(&sanitized), vec![ViolationKind::UnknownTag]);
    }

    #[test]
    fn test_unknown_wrapper_drops_whole_subtree() {
        let sanitized = sanitize("<marquee><p>inside</p></marquee><p>out</p>").unwrap();
        assert_eq!(sanitized.tree.to_markup(), "<p>out</p>");
    }

    #[test]
    fn test_attributes_are_filtered() {
        let sanitized = sanitize(
            "<a href=\"javascript:alert(1)\" onclick=\"x()\" style=\"color:red\" class=\"c\" data-id=\"1\">x</a>",
        )
        .unwrap();

        assert_eq!(
            sanitized.tree.to_markup(),
            "<a class=\"c\" data-id=\"1\">x</a>"
        );
        assert_eq!(
            kinds(&sanitized),
            vec![
                ViolationKind::DisallowedUri,
                ViolationKind::EventHandler,
                ViolationKind::DisallowedAttribute
            ]
        );
    }

    #[test]
    fn test_target_forces_rel() {
        let sanitized =
            sanitize("<a href=\"https://x.test\" target=\"_blank\" rel=\"opener\">x</a>").unwrap();
        assert_eq!(
            sanitized.tree.to_markup(),
            "<a href=\"https://x.test\" rel=\"noopener noreferrer\" target=\"_blank\">x</a>"
        );
    }

    #[test]
    fn test_custom_tag_props_are_filtered() {
        let sanitized = sanitize("<PostList limit=\"5\" color=\"red\" onmouseover=\"x()\"></PostList>").unwrap();
        assert_eq!(
            sanitized.tree.to_markup(),
            "<postlist limit=\"5\"></postlist>"
        );
        assert_eq!(
            kinds(&sanitized),
            vec![ViolationKind::UnknownProp, ViolationKind::EventHandler]
        );
    }

    #[test]
    fn test_mode_gates_custom_tags() {
        let config = ValidationConfig::default().with_mode(TemplateMode::Basic);
        let sanitized = sanitize_with(
            "<IfOwner><p>secret</p></IfOwner><Bio></Bio>",
            config,
        )
        .unwrap();

        assert_eq!(sanitized.tree.to_markup(), "<bio></bio>");
        assert_eq!(kinds(&sanitized), vec![ViolationKind::TagNotAllowedInMode]);
    }

    #[rstest]
    #[case::nodes(
        ValidationConfig { max_nodes: 3, ..Default::default() },
        "<p>a</p><p>b</p>",
        TemplateError::TooComplex { limit: Limit::Nodes, actual: 4, max: 3 }
    )]
    #[case::depth(
        ValidationConfig { max_depth: 2, ..Default::default() },
        "<div><div><div>x</div></div></div>",
        TemplateError::TooComplex { limit: Limit::Depth, actual: 3, max: 2 }
    )]
    fn test_budgets(
        #[case] config: ValidationConfig,
        #[case] source: &str,
        #[case] expected: TemplateError,
    ) {
        assert_eq!(sanitize_with(source, config), Err(expected));
    }

    #[rstest]
    #[case::paragraph_in_paragraph("<p><IfOwner><p>secret</p></IfOwner></p>")]
    #[case::block_in_paragraph("<p>Hi <IfOwner><div>private draft</div></IfOwner></p>")]
    #[case::rows_in_table("<table><IfOwner><tr><td>secret row</td></tr></IfOwner></table>")]
    #[case::item_in_item("<ul><li>a<IfOwner><li>secret item</li></IfOwner></li></ul>")]
    fn test_moved_gate_content_is_malformed(#[case] source: &str) {
        assert_eq!(
            sanitize(source),
            Err(TemplateError::Malformed {
                message: "<IfOwner> is not closed inside the element that contains it".to_string()
            })
        );
    }

    #[rstest]
    #[case::paragraph("<p>Hi <IfOwner><b>there</b></IfOwner></p>", "<p>Hi <ifowner><b>there</b></ifowner></p>")]
    #[case::cell(
        "<table><tr><td><IfOwner>secret</IfOwner></td></tr></table>",
        "<table><tbody><tr><td><ifowner>secret</ifowner></td></tr></tbody></table>"
    )]
    #[case::list("<ul><IfOwner><li>secret</li></IfOwner></ul>", "<ul><ifowner><li>secret</li></ifowner></ul>")]
    fn test_gates_keep_their_content(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(sanitize(source).unwrap().tree.to_markup(), expected);
    }

    #[test]
    fn test_parser_depth_overflow_is_too_complex() {
        let depth = MAX_NESTING + 5;
        let source = format!("{}{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let config = ValidationConfig {
            max_depth: MAX_NESTING,
            max_nodes: usize::MAX,
            ..Default::default()
        };

        assert!(matches!(
            sanitize_with(&source, config),
            Err(TemplateError::TooComplex {
                limit: Limit::Depth,
                ..
            })
        ));
    }
}
