use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Tag name of the synthetic element that holds a parsed fragment.
pub const ROOT_TAG: &str = "#fragment";

/// Elements that never have children or a closing tag.
pub const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub type Attributes = BTreeMap<SmolStr, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "snake_case"))]
pub enum TemplateNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct Element {
    pub tag: SmolStr,
    /// Attribute names are unique; iteration order is by name.
    pub attributes: Attributes,
    pub children: Vec<TemplateNode>,
}

impl Element {
    pub fn new(tag: &str, attributes: Attributes, children: Vec<TemplateNode>) -> Self {
        Self {
            tag: SmolStr::new(tag.to_ascii_lowercase()),
            attributes,
            children,
        }
    }

    #[inline(always)]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.tag == ROOT_TAG
    }

    pub fn is_void(&self) -> bool {
        VOID_TAGS.contains(&self.tag.as_str())
    }
}

impl TemplateNode {
    pub fn root(children: Vec<TemplateNode>) -> Self {
        TemplateNode::Element(Element {
            tag: SmolStr::new_static(ROOT_TAG),
            attributes: Attributes::new(),
            children,
        })
    }

    pub fn element(tag: &str, attributes: Attributes, children: Vec<TemplateNode>) -> Self {
        TemplateNode::Element(Element::new(tag, attributes, children))
    }

    pub fn text(content: impl Into<String>) -> Self {
        TemplateNode::Text(content.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            TemplateNode::Element(element) => Some(element),
            TemplateNode::Text(_) => None,
        }
    }

    pub fn children(&self) -> &[TemplateNode] {
        match self {
            TemplateNode::Element(element) => &element.children,
            TemplateNode::Text(_) => &[],
        }
    }

    pub fn is_whitespace(&self) -> bool {
        matches!(self, TemplateNode::Text(text) if text.trim().is_empty())
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(TemplateNode::node_count).sum::<usize>()
    }

    /// Element nesting depth of this subtree. Text contributes nothing.
    pub fn depth(&self) -> usize {
        match self {
            TemplateNode::Text(_) => 0,
            TemplateNode::Element(element) => {
                1 + element
                    .children
                    .iter()
                    .map(TemplateNode::depth)
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            TemplateNode::Text(text) => text.clone(),
            TemplateNode::Element(element) => element
                .children
                .iter()
                .map(TemplateNode::text_content)
                .collect(),
        }
    }

    /// Pre-order traversal of this subtree, starting with `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        write_markup(self, &mut out);
        out
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Display for TemplateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_markup())
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a TemplateNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a TemplateNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

fn write_markup(node: &TemplateNode, out: &mut String) {
    match node {
        TemplateNode::Text(text) => out.push_str(&escape_text(text)),
        TemplateNode::Element(element) if element.is_root() => {
            element.children.iter().for_each(|child| write_markup(child, out));
        }
        TemplateNode::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            write_attributes(element.attributes.iter(), out);
            out.push('>');

            if element.is_void() {
                return;
            }

            element.children.iter().for_each(|child| write_markup(child, out));
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

pub fn write_attributes<'a, K, I>(attributes: I, out: &mut String)
where
    K: AsRef<str> + 'a,
    I: Iterator<Item = (&'a K, &'a String)>,
{
    for (name, value) in attributes {
        out.push(' ');
        out.push_str(name.as_ref());
        out.push_str("=\"");
        out.push_str(&escape_attribute(value));
        out.push('"');
    }
}

pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
