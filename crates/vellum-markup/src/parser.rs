use crate::node::{Attributes, Element, TemplateNode, VOID_TAGS};
use regex_lite::{Captures, Regex};
use scraper::{ElementRef, Html, Node};
use smol_str::SmolStr;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Hard cap on element nesting kept by the parser. Anything deeper is not
/// converted and the result is flagged with `depth_exceeded`.
pub const MAX_NESTING: usize = 256;

/// A start or end tag whose attribute values may be quoted. Groups: closing
/// slash, name, attribute text, self-closing slash.
static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"<(/)?([A-Za-z][A-Za-z0-9-]*)((?:\s+[^\s"'<>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'<>=`]+))?)*)\s*(/)?>"#,
    )
    .ok()
});

/// Elements whose content model makes the tree builder move stray content
/// out of them.
const FOSTER_PARENTS: &[&str] = &["table", "thead", "tbody", "tfoot", "tr"];

const ATTRIBUTE_HOLDER: &str = "vellum-attrs";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTemplate {
    pub root: TemplateNode,
    /// Set when the input nested deeper than [`MAX_NESTING`].
    pub depth_exceeded: bool,
    /// Component tags whose content did not stay inside the element they
    /// were written in. Such a tree must not be rendered.
    pub misnested: Vec<SmolStr>,
    /// Recovery notes reported by the tree builder.
    pub recovered: Vec<String>,
}

impl ParsedTemplate {
    pub fn into_root(self) -> TemplateNode {
        self.root
    }

    pub fn is_misnested(&self) -> bool {
        !self.misnested.is_empty()
    }
}

/// Parses template source into a single root node.
///
/// Parsing never fails. Unclosed tags are closed, orphan closing tags are
/// dropped and unknown entities stay literal text, following the HTML
/// tree-building rules. Comments, doctypes and processing instructions are
/// discarded.
pub fn parse(source: &str) -> ParsedTemplate {
    parse_with_components(source, &[])
}

/// Like [`parse`], but the named tags (matched case-insensitively) keep the
/// nesting they have in the source.
///
/// The HTML tree builder moves content around unknown tags: a `<p>` inside a
/// `<p>` closes the outer one, a `<tr>` escapes to its table and a `<li>`
/// closes its sibling. Component tags are therefore taken out of the markup
/// before tree building and put back afterwards. When the surrounding markup
/// moved a component's content out from under it, the tag is listed in
/// [`ParsedTemplate::misnested`].
pub fn parse_with_components(source: &str, components: &[&str]) -> ParsedTemplate {
    let components = components
        .iter()
        .map(|tag| SmolStr::new(tag.to_ascii_lowercase()))
        .collect::<Vec<_>>();
    let prefix = marker_prefix(source);
    let mut found = Vec::new();
    let rewritten = rewrite_tags(source, &components, &prefix, &mut found);

    let fragment = Html::parse_fragment(&rewritten);
    let attributes = component_attributes(&found);
    let mut builder = TreeBuilder {
        components: &components,
        found: &found,
        attributes,
        prefix: &prefix,
        depth_exceeded: false,
        misnested: Vec::new(),
    };
    let children = builder.children(fragment.root_element(), 1);

    ParsedTemplate {
        root: TemplateNode::root(children),
        depth_exceeded: builder.depth_exceeded,
        misnested: builder.misnested,
        recovered: fragment.errors.iter().map(|e| e.to_string()).collect(),
    }
}

/// A component tag as written in the source, in document order.
#[derive(Debug)]
struct Written {
    tag: SmolStr,
    attributes: String,
    /// A matching end tag (or `/>`) was found in the source.
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Open(usize),
    Close(usize),
}

/// Returns a comment prefix that does not occur anywhere in `source`, so no
/// comment the author wrote can pass for a marker.
fn marker_prefix(source: &str) -> String {
    let mut prefix = String::from("vellum:");
    while source.contains(prefix.as_str()) {
        prefix.push('#');
    }
    prefix
}

fn marker(prefix: &str, marker: Marker) -> String {
    match marker {
        Marker::Open(index) => format!("<!--{}o{}-->", prefix, index),
        Marker::Close(index) => format!("<!--{}c{}-->", prefix, index),
    }
}

fn read_marker(prefix: &str, comment: &str) -> Option<Marker> {
    let rest = comment.strip_prefix(prefix)?;
    if let Some(index) = rest.strip_prefix('o') {
        index.parse().ok().map(Marker::Open)
    } else {
        rest.strip_prefix('c')?.parse().ok().map(Marker::Close)
    }
}

/// Replaces component tags with marker comments and expands `<Tag />` into
/// `<Tag></Tag>` for non-void tags. End tags are paired with the nearest
/// open component of the same name; an end tag with no partner is dropped.
fn rewrite_tags<'s>(
    source: &'s str,
    components: &[SmolStr],
    prefix: &str,
    found: &mut Vec<Written>,
) -> Cow<'s, str> {
    let Some(re) = TAG.as_ref() else {
        return Cow::Borrowed(source);
    };
    let mut open: Vec<usize> = Vec::new();

    re.replace_all(source, |caps: &Captures| {
        let name = &caps[2];
        let lowered = name.to_ascii_lowercase();
        let attributes = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let closing = caps.get(1).is_some();
        let self_closing = caps.get(4).is_some();

        if components.iter().any(|tag| *tag == lowered) {
            if closing {
                return match open.iter().rposition(|&i| found[i].tag == lowered) {
                    Some(position) => {
                        let index = open[position];
                        open.truncate(position);
                        found[index].closed = true;
                        marker(prefix, Marker::Close(index))
                    }
                    None => String::new(),
                };
            }

            let index = found.len();
            found.push(Written {
                tag: SmolStr::new(&lowered),
                attributes: attributes.to_string(),
                closed: self_closing,
            });

            if self_closing {
                format!(
                    "{}{}",
                    marker(prefix, Marker::Open(index)),
                    marker(prefix, Marker::Close(index))
                )
            } else {
                open.push(index);
                marker(prefix, Marker::Open(index))
            }
        } else if self_closing && !closing {
            if VOID_TAGS.contains(&lowered.as_str()) {
                format!("<{}{}>", name, attributes)
            } else {
                format!("<{}{}></{}>", name, attributes, name)
            }
        } else {
            caps[0].to_string()
        }
    })
}

/// Decodes the attribute text of every component through the tree builder,
/// so entities and name casing are handled exactly as for plain elements.
fn component_attributes(found: &[Written]) -> Vec<Attributes> {
    if found.is_empty() {
        return Vec::new();
    }

    let holders = found
        .iter()
        .map(|written| {
            format!(
                "<{}{}></{}>",
                ATTRIBUTE_HOLDER, written.attributes, ATTRIBUTE_HOLDER
            )
        })
        .collect::<String>();

    Html::parse_fragment(&holders)
        .root_element()
        .child_elements()
        .map(|element| attributes_of(&element))
        .collect()
}

fn attributes_of(element: &ElementRef<'_>) -> Attributes {
    element
        .value()
        .attrs()
        .map(|(name, value)| (SmolStr::new(name.to_ascii_lowercase()), value.to_string()))
        .collect()
}

/// A component whose open marker has been seen on the current level.
struct Frame {
    index: usize,
    children: Vec<TemplateNode>,
}

struct TreeBuilder<'a> {
    components: &'a [SmolStr],
    found: &'a [Written],
    attributes: Vec<Attributes>,
    prefix: &'a str,
    depth_exceeded: bool,
    misnested: Vec<SmolStr>,
}

impl TreeBuilder<'_> {
    fn flag(&mut self, tag: &SmolStr) {
        if !self.misnested.contains(tag) {
            self.misnested.push(tag.clone());
        }
    }

    fn flag_written(&mut self, index: usize) {
        if let Some(written) = self.found.get(index) {
            let tag = written.tag.clone();
            self.flag(&tag);
        }
    }

    /// Converts the children of `parent`, rebuilding component elements
    /// from pairs of markers that are siblings of each other.
    fn children(&mut self, parent: ElementRef<'_>, depth: usize) -> Vec<TemplateNode> {
        let foster_parent = FOSTER_PARENTS.contains(&parent.value().name());
        let mut nodes = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();

        for child in parent.children() {
            let node = match child.value() {
                Node::Comment(comment) => {
                    match read_marker(self.prefix, comment) {
                        Some(Marker::Open(index)) => {
                            if foster_parent {
                                self.flag_written(index);
                            }
                            if depth + frames.len() > MAX_NESTING {
                                self.depth_exceeded = true;
                            }
                            frames.push(Frame {
                                index,
                                children: Vec::new(),
                            });
                        }
                        Some(Marker::Close(index)) => {
                            match frames.iter().rposition(|frame| frame.index == index) {
                                Some(position) => {
                                    while frames.len() > position {
                                        self.close_frame(&mut frames, &mut nodes);
                                    }
                                }
                                None => self.flag_written(index),
                            }
                        }
                        None => {}
                    }
                    continue;
                }
                Node::Text(text) => {
                    let content: &str = text;
                    if content.is_empty() {
                        continue;
                    }
                    TemplateNode::Text(content.to_string())
                }
                Node::Element(_) => {
                    let Some(element) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let depth = depth + frames.len();
                    if depth > MAX_NESTING {
                        self.depth_exceeded = true;
                        continue;
                    }

                    let tag = SmolStr::new(element.value().name().to_ascii_lowercase());
                    if self.components.contains(&tag) {
                        self.flag(&tag);
                    }

                    TemplateNode::Element(Element {
                        tag,
                        attributes: attributes_of(&element),
                        children: self.children(element, depth + 1),
                    })
                }
                _ => continue,
            };

            match frames.last_mut() {
                Some(frame) => frame.children.push(node),
                None => nodes.push(node),
            }
        }

        while let Some(frame) = frames.last() {
            // An unclosed component runs to the end of the document, which
            // only holds at the top level. One whose end tag was written
            // lost it to the markup around it.
            let closed_elsewhere = self.found.get(frame.index).is_some_and(|w| w.closed);
            if closed_elsewhere || depth > 1 {
                self.flag_written(frame.index);
            }
            self.close_frame(&mut frames, &mut nodes);
        }

        nodes
    }

    fn close_frame(&mut self, frames: &mut Vec<Frame>, nodes: &mut Vec<TemplateNode>) {
        let Some(frame) = frames.pop() else {
            return;
        };
        let Some(written) = self.found.get(frame.index) else {
            return;
        };

        let element = TemplateNode::Element(Element {
            tag: written.tag.clone(),
            attributes: self
                .attributes
                .get_mut(frame.index)
                .map(std::mem::take)
                .unwrap_or_default(),
            children: frame.children,
        });

        match frames.last_mut() {
            Some(parent) => parent.children.push(element),
            None => nodes.push(element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ROOT_TAG;
    use rstest::rstest;

    const GATES: &[&str] = &["Show", "IfOwner", "Bio", "PostList", "Choose", "When", "Otherwise"];

    fn markup(source: &str) -> String {
        parse(source).root.to_markup()
    }

    fn gated(source: &str) -> ParsedTemplate {
        parse_with_components(source, GATES)
    }

    #[rstest]
    #[case::plain("<p>hi</p>", "<p>hi</p>")]
    #[case::unclosed("<div><p>hi", "<div><p>hi</p></div>")]
    #[case::orphan_closer("<p>hi</p></span>", "<p>hi</p>")]
    #[case::unknown_entity("<p>&bogus; &amp;</p>", "<p>&amp;bogus; &amp;</p>")]
    #[case::comment("<!-- note --><p>a</p>", "<p>a</p>")]
    #[case::custom_case("<Show data=\"posts.length\"><p>x</p></Show>", "<show data=\"posts.length\"><p>x</p></show>")]
    #[case::self_closing("<Bio /><p>after</p>", "<bio></bio><p>after</p>")]
    #[case::self_closing_with_attrs("<PostList limit=\"5\"/><p>x</p>", "<postlist limit=\"5\"></postlist><p>x</p>")]
    #[case::void_self_closing("<br/><p>x</p>", "<br><p>x</p>")]
    #[case::slash_in_quoted_value("<span title=\"a/>b\">x</span>", "<span title=\"a/&gt;b\">x</span>")]
    #[case::slash_in_single_quoted_value("<Bio title='a/>b' /><p>x</p>", "<bio title=\"a/&gt;b\"></bio><p>x</p>")]
    fn test_parse(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(markup(source), expected);
    }

    #[rstest]
    #[case::gate_in_div(
        "<div><IfOwner><p>x</p></IfOwner></div>",
        "<div><ifowner><p>x</p></ifowner></div>"
    )]
    #[case::items_in_list(
        "<ul><IfOwner><li>a</li><li>b</li></IfOwner></ul>",
        "<ul><ifowner><li>a</li><li>b</li></ifowner></ul>"
    )]
    #[case::gate_in_cell(
        "<table><tr><td><IfOwner>x</IfOwner></td></tr></table>",
        "<table><tbody><tr><td><ifowner>x</ifowner></td></tr></tbody></table>"
    )]
    #[case::gate_around_table(
        "<IfOwner><table><tr><td>x</td></tr></table></IfOwner>",
        "<ifowner><table><tbody><tr><td>x</td></tr></tbody></table></ifowner>"
    )]
    #[case::text_gate_in_paragraph("<p>Hi <IfOwner>there</IfOwner></p>", "<p>Hi <ifowner>there</ifowner></p>")]
    #[case::nested_gates(
        "<Show data=\"posts.length\"><IfOwner><p>x</p></IfOwner></Show>",
        "<show data=\"posts.length\"><ifowner><p>x</p></ifowner></show>"
    )]
    #[case::branches(
        "<Choose><When data=\"posts.length\">a</When><Otherwise>b</Otherwise></Choose>",
        "<choose><when data=\"posts.length\">a</when><otherwise>b</otherwise></choose>"
    )]
    #[case::self_closed_leaf("<p><Bio /> and <PostList limit=3 /></p>", "<p><bio></bio> and <postlist limit=\"3\"></postlist></p>")]
    #[case::unclosed_at_top_level("<IfOwner><p>a</p><p>b", "<ifowner><p>a</p><p>b</p></ifowner>")]
    #[case::orphan_component_closer("<p>a</p></IfOwner>", "<p>a</p>")]
    #[case::entity_in_prop("<Show data=\"owner.handle\" equals=\"a&amp;b\">x</Show>", "<show data=\"owner.handle\" equals=\"a&amp;b\">x</show>")]
    fn test_parse_with_components_keeps_nesting(#[case] source: &str, #[case] expected: &str) {
        let parsed = gated(source);
        assert_eq!(parsed.root.to_markup(), expected);
        assert!(!parsed.is_misnested(), "{:?}", parsed.misnested);
    }

    #[rstest]
    #[case::paragraph_in_paragraph("<p><IfOwner><p>secret</p></IfOwner></p>")]
    #[case::block_in_paragraph("<p>Hi <IfOwner><div>private draft</div></IfOwner></p>")]
    #[case::rows_in_table("<table><IfOwner><tr><td>secret row</td></tr></IfOwner></table>")]
    #[case::rows_in_body("<table><tbody><IfOwner><tr><td>secret row</td></tr></IfOwner></tbody></table>")]
    #[case::item_in_item("<ul><li>a<IfOwner><li>secret item</li></IfOwner></li></ul>")]
    #[case::closed_by_formatting("<b><IfOwner>x</b>secret</IfOwner>")]
    #[case::unclosed_in_paragraph("<p><IfOwner><p>secret")]
    #[case::broken_out_of_svg("<svg><IfOwner><p>secret</p></IfOwner></svg>")]
    fn test_parse_with_components_flags_moved_content(#[case] source: &str) {
        let parsed = gated(source);
        assert_eq!(parsed.misnested, vec![SmolStr::new("ifowner")]);
    }

    #[test]
    fn test_parse_with_components_ignores_forged_markers() {
        let parsed = gated("<!--vellum:o0--><p>secret</p><!vellum:c0><IfOwner>x</IfOwner>");

        assert_eq!(parsed.root.to_markup(), "<p>secret</p><ifowner>x</ifowner>");
        assert!(!parsed.is_misnested());
    }

    #[test]
    fn test_parse_with_components_flags_unparsed_component_tag() {
        let parsed = gated("<IfOwner data=\"a\"title=\"b\"><p>secret</p></IfOwner>");
        assert!(parsed.is_misnested());
    }

    #[test]
    fn test_parse_root_is_fragment() {
        let parsed = parse("text only");
        match &parsed.root {
            TemplateNode::Element(element) => {
                assert_eq!(element.tag, ROOT_TAG);
                assert_eq!(element.children, vec![TemplateNode::text("text only")]);
            }
            TemplateNode::Text(_) => panic!("root must be an element"),
        }
        assert!(!parsed.depth_exceeded);
        assert!(!parsed.is_misnested());
    }

    #[test]
    fn test_parse_empty() {
        let parsed = parse("");
        assert_eq!(parsed.root.children().len(), 0);
    }

    #[test]
    fn test_parse_duplicate_attributes_keep_first() {
        let parsed = parse("<a href=\"/one\" href=\"/two\">x</a>");
        let link = parsed.root.children()[0].as_element().cloned().unwrap_or_default();
        assert_eq!(link.attr("href"), Some("/one"));
    }

    #[test]
    fn test_parse_deep_nesting_is_flagged() {
        let depth = MAX_NESTING + 10;
        let source = format!("{}x{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let parsed = parse(&source);

        assert!(parsed.depth_exceeded);
        assert_eq!(parsed.root.depth(), MAX_NESTING + 1);
    }

    #[test]
    fn test_parse_deep_gates_are_flagged() {
        let depth = MAX_NESTING + 10;
        let source = format!("{}x{}", "<Show data=\"posts\">".repeat(depth), "</Show>".repeat(depth));

        assert!(gated(&source).depth_exceeded);
    }

    #[rstest]
    #[case("plain", "vellum:")]
    #[case("<!--vellum:o0-->", "vellum:#")]
    #[case("vellum: vellum:#", "vellum:##")]
    fn test_marker_prefix(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(marker_prefix(source), expected);
    }
}
