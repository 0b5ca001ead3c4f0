use crate::config::{TemplateMode, ValidationConfig};
use crate::error::{Limit, TemplateError, Violation, ViolationKind};
use crate::registry::{
    ComponentDescriptor, ComponentKind, ComponentRegistry, Gate, PropValue, REGISTRY_VERSION,
    Structure,
};
use crate::sanitizer::{SANITIZER_RULES_VERSION, Sanitizer, markup_attributes};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use vellum_markup::{Attributes, Element, TemplateNode};

const COMPILER_REVISION: u16 = 5;

/// Identifies the rule set a template was compiled under. Any change to the
/// compiler, the registry or the sanitizer rules produces a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CompilerVersion {
    pub compiler: u16,
    pub registry: u16,
    pub rules: u16,
}

impl CompilerVersion {
    pub const CURRENT: CompilerVersion = CompilerVersion {
        compiler: COMPILER_REVISION,
        registry: REGISTRY_VERSION,
        rules: SANITIZER_RULES_VERSION,
    };
}

impl Display for CompilerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.compiler, self.registry, self.rules)
    }
}

pub type Props = BTreeMap<&'static str, PropValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompiledNode {
    Text {
        content: String,
    },
    Markup {
        tag: SmolStr,
        attributes: Attributes,
        children: Vec<CompiledNode>,
    },
    Component {
        #[serde(serialize_with = "serialize_tag_name")]
        component: &'static ComponentDescriptor,
        props: Props,
        children: Vec<CompiledNode>,
    },
}

fn serialize_tag_name<S: Serializer>(
    component: &&'static ComponentDescriptor,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(component.tag_name)
}

impl CompiledNode {
    pub fn children(&self) -> &[CompiledNode] {
        match self {
            CompiledNode::Text { .. } => &[],
            CompiledNode::Markup { children, .. } | CompiledNode::Component { children, .. } => {
                children
            }
        }
    }

    pub fn component(&self) -> Option<&'static ComponentDescriptor> {
        match self {
            CompiledNode::Component { component, .. } => Some(component),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateStats {
    pub node_count: usize,
    pub max_depth: usize,
    pub size_bytes: usize,
}

/// An immutable, validated template. Shared between renders through `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledTemplate {
    source_hash: String,
    content_hash: String,
    ast: Vec<CompiledNode>,
    stats: TemplateStats,
    compiled_at: DateTime<Utc>,
    compiler_version: CompilerVersion,
    mode: TemplateMode,
    violations: Vec<Violation>,
}

impl CompiledTemplate {
    /// Placeholder served to viewers when nothing compiled is available.
    pub fn empty(mode: TemplateMode) -> Self {
        Self {
            source_hash: source_hash("", mode),
            content_hash: digest_hex(""),
            ast: Vec::new(),
            stats: TemplateStats {
                node_count: 0,
                max_depth: 0,
                size_bytes: 0,
            },
            compiled_at: Utc::now(),
            compiler_version: CompilerVersion::CURRENT,
            mode,
            violations: Vec::new(),
        }
    }

    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn ast(&self) -> &[CompiledNode] {
        &self.ast
    }

    pub fn stats(&self) -> TemplateStats {
        self.stats
    }

    pub fn compiled_at(&self) -> DateTime<Utc> {
        self.compiled_at
    }

    pub fn compiler_version(&self) -> CompilerVersion {
        self.compiler_version
    }

    pub fn mode(&self) -> TemplateMode {
        self.mode
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    #[cfg(test)]
    pub(crate) fn with_compiler_version(mut self, version: CompilerVersion) -> Self {
        self.compiler_version = version;
        self
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).join("")
}

fn digest_hex(input: &str) -> String {
    hex(&Sha256::digest(input.as_bytes()))
}

/// Cache key for a template source. The richness mode is part of the key
/// because the same source compiles differently per mode.
pub fn source_hash(source: &str, mode: TemplateMode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mode.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    hex(&hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Body,
    Choose,
}

pub struct Compiler<'a> {
    registry: &'a ComponentRegistry,
    config: ValidationConfig,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a ComponentRegistry, config: ValidationConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn compile_bytes(&self, source: &[u8]) -> Result<CompiledTemplate, TemplateError> {
        let source = std::str::from_utf8(source).map_err(|e| TemplateError::Malformed {
            message: e.to_string(),
        })?;
        self.compile(source)
    }

    /// Runs parse, sanitize and compile. Budget violations reject the whole
    /// template; everything else is reported as a violation on the result.
    pub fn compile(&self, source: &str) -> Result<CompiledTemplate, TemplateError> {
        let size_bytes = source.len();
        if size_bytes > self.config.max_bytes {
            return Err(TemplateError::TooComplex {
                limit: Limit::Bytes,
                actual: size_bytes,
                max: self.config.max_bytes,
            });
        }

        let parsed = vellum_markup::parse_with_components(source, self.registry.tag_names());
        if !parsed.recovered.is_empty() {
            tracing::debug!(
                recovered = parsed.recovered.len(),
                "parser repaired malformed markup"
            );
        }

        let sanitized = Sanitizer::new(self.registry, self.config).sanitize(&parsed)?;
        let mut violations = sanitized.violations;
        let ast = self.compile_children(sanitized.tree.children(), Scope::Body, &mut violations);

        let stats = TemplateStats {
            node_count: sanitized.tree.node_count() - 1,
            max_depth: sanitized.tree.depth().saturating_sub(1),
            size_bytes,
        };

        tracing::debug!(
            nodes = stats.node_count,
            depth = stats.max_depth,
            bytes = stats.size_bytes,
            violations = violations.len(),
            "template compiled"
        );

        Ok(CompiledTemplate {
            source_hash: source_hash(source, self.config.mode),
            content_hash: digest_hex(&sanitized.tree.to_markup()),
            ast,
            stats,
            compiled_at: Utc::now(),
            compiler_version: CompilerVersion::CURRENT,
            mode: self.config.mode,
            violations,
        })
    }

    fn compile_children(
        &self,
        children: &[TemplateNode],
        scope: Scope,
        violations: &mut Vec<Violation>,
    ) -> Vec<CompiledNode> {
        let mut compiled = Vec::with_capacity(children.len());
        let mut has_otherwise = false;

        for child in children {
            let element = match child {
                TemplateNode::Text(text) => {
                    match scope {
                        Scope::Body => compiled.push(CompiledNode::Text {
                            content: text.clone(),
                        }),
                        Scope::Choose if child.is_whitespace() => {}
                        Scope::Choose => violations.push(Violation::new(
                            ViolationKind::MisplacedBranch,
                            "Choose",
                            "text directly inside Choose is ignored",
                        )),
                    }
                    continue;
                }
                TemplateNode::Element(element) => element,
            };

            if markup_attributes(&element.tag).is_some() {
                if scope == Scope::Choose {
                    violations.push(Violation::new(
                        ViolationKind::MisplacedBranch,
                        &element.tag,
                        "only When and Otherwise may appear inside Choose",
                    ));
                    continue;
                }

                compiled.push(CompiledNode::Markup {
                    tag: element.tag.clone(),
                    attributes: element.attributes.clone(),
                    children: self.compile_children(&element.children, Scope::Body, violations),
                });
                continue;
            }

            let Some(descriptor) = self.registry.get(&element.tag) else {
                violations.push(Violation::new(
                    ViolationKind::UnknownTag,
                    &element.tag,
                    "element and its contents removed",
                ));
                continue;
            };

            match (scope, descriptor.kind.is_branch()) {
                (Scope::Body, true) => {
                    violations.push(Violation::new(
                        ViolationKind::MisplacedBranch,
                        descriptor.tag_name,
                        format!("{} must be a direct child of Choose", descriptor.tag_name),
                    ));
                    continue;
                }
                (Scope::Choose, false) => {
                    violations.push(Violation::new(
                        ViolationKind::MisplacedBranch,
                        descriptor.tag_name,
                        "only When and Otherwise may appear inside Choose",
                    ));
                    continue;
                }
                _ => {}
            }

            if descriptor.kind == ComponentKind::Conditional(Gate::Otherwise) {
                if has_otherwise {
                    violations.push(Violation::new(
                        ViolationKind::MisplacedBranch,
                        descriptor.tag_name,
                        "only the first Otherwise is used",
                    ));
                    continue;
                }
                has_otherwise = true;
            }

            compiled.push(self.compile_component(element, descriptor, violations));
        }

        compiled
    }

    fn compile_component(
        &self,
        element: &Element,
        descriptor: &'static ComponentDescriptor,
        violations: &mut Vec<Violation>,
    ) -> CompiledNode {
        let (mut props, rejected) = compile_props(element, descriptor, violations);
        if rejected && matches!(descriptor.kind, ComponentKind::Conditional(_)) {
            // A predicate that cannot be read as written is never satisfied.
            props.remove("data");
        }

        let children = match descriptor.kind {
            ComponentKind::Leaf(_) => {
                if element.children.iter().any(|child| !child.is_whitespace()) {
                    violations.push(Violation::new(
                        ViolationKind::IgnoredChildren,
                        descriptor.tag_name,
                        format!("{} does not render its contents", descriptor.tag_name),
                    ));
                }
                Vec::new()
            }
            ComponentKind::Structural(Structure::Choose) => {
                self.compile_children(&element.children, Scope::Choose, violations)
            }
            ComponentKind::Conditional(_) => {
                self.compile_children(&element.children, Scope::Body, violations)
            }
        };

        CompiledNode::Component {
            component: descriptor,
            props,
            children,
        }
    }
}

/// Returns the coerced props and whether any written value was rejected.
fn compile_props(
    element: &Element,
    descriptor: &ComponentDescriptor,
    violations: &mut Vec<Violation>,
) -> (Props, bool) {
    let mut props = Props::new();
    let mut rejected = false;

    for schema in descriptor.allowed_props {
        let value = match element.attr(schema.name) {
            Some(raw) => match schema.coerce(raw) {
                Ok(value) => Some(value),
                Err(reason) => {
                    rejected = true;
                    violations.push(Violation::new(
                        ViolationKind::InvalidProp,
                        descriptor.tag_name,
                        format!("{}: {}", schema.name, reason),
                    ));
                    schema.fallback_value()
                }
            },
            None if schema.required => {
                violations.push(Violation::new(
                    ViolationKind::MissingProp,
                    descriptor.tag_name,
                    format!("\"{}\" is required", schema.name),
                ));
                None
            }
            None => schema.fallback_value(),
        };

        if let Some(value) = value {
            props.insert(schema.name, value);
        }
    }

    (props, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_path::DataPath;
    use rstest::rstest;

    fn compile(source: &str) -> CompiledTemplate {
        Compiler::new(ComponentRegistry::builtin(), ValidationConfig::default())
            .compile(source)
            .unwrap()
    }

    fn kinds(template: &CompiledTemplate) -> Vec<ViolationKind> {
        template.violations().iter().map(|v| v.kind).collect()
    }

    fn tags(nodes: &[CompiledNode]) -> Vec<&'static str> {
        nodes
            .iter()
            .filter_map(|node| node.component().map(|c| c.tag_name))
            .collect()
    }

    #[test]
    fn test_props_are_coerced_and_defaulted() {
        let template = compile("<PostList limit=\"5\"></PostList>");
        let CompiledNode::Component { props, .. } = &template.ast()[0] else {
            panic!("expected a component");
        };

        assert_eq!(props.get("limit"), Some(&PropValue::Number(5)));
        assert_eq!(
            props.get("order"),
            Some(&PropValue::String("newest".to_string()))
        );
        assert_eq!(props.get("showmedia"), Some(&PropValue::Boolean(true)));
        assert!(template.violations().is_empty());
    }

    #[rstest]
    #[case::out_of_range("<PostList limit=\"500\"></PostList>", ViolationKind::InvalidProp)]
    #[case::bad_enum("<Avatar size=\"huge\"></Avatar>", ViolationKind::InvalidProp)]
    #[case::missing_data("<Show><p>x</p></Show>", ViolationKind::MissingProp)]
    #[case::unknown_path("<Show data=\"owner.password\"><p>x</p></Show>", ViolationKind::InvalidProp)]
    #[case::leaf_children("<Bio><p>ignored</p></Bio>", ViolationKind::IgnoredChildren)]
    #[case::stray_when("<When data=\"posts.length\"><p>x</p></When>", ViolationKind::MisplacedBranch)]
    fn test_single_violation(#[case] source: &str, #[case] expected: ViolationKind) {
        assert_eq!(kinds(&compile(source)), vec![expected]);
    }

    #[test]
    fn test_invalid_prop_falls_back_to_default() {
        let template = compile("<PostList limit=\"500\"></PostList>");
        let CompiledNode::Component { props, .. } = &template.ast()[0] else {
            panic!("expected a component");
        };
        assert_eq!(props.get("limit"), Some(&PropValue::Number(10)));
    }

    #[test]
    fn test_rejected_predicate_prop_drops_data_path() {
        let source = format!("<Show data=\"owner.handle\" equals=\"{}\">x</Show>", "x".repeat(201));
        let template = compile(&source);
        let CompiledNode::Component { props, .. } = &template.ast()[0] else {
            panic!("expected a component");
        };

        assert!(props.is_empty());
        assert_eq!(kinds(&template), vec![ViolationKind::InvalidProp]);
    }

    #[test]
    fn test_rejected_leaf_prop_keeps_other_props() {
        let template = compile("<PostList limit=\"500\" order=\"oldest\"></PostList>");
        let CompiledNode::Component { props, .. } = &template.ast()[0] else {
            panic!("expected a component");
        };
        assert_eq!(props.get("order"), Some(&PropValue::String("oldest".to_string())));
    }

    #[test]
    fn test_data_prop_is_typed() {
        let template = compile("<Show data=\"viewer.isOwner\"><p>x</p></Show>");
        let CompiledNode::Component { props, .. } = &template.ast()[0] else {
            panic!("expected a component");
        };
        assert_eq!(
            props.get("data").and_then(PropValue::as_path),
            Some(&DataPath::ViewerIsOwner)
        );
    }

    #[test]
    fn test_choose_keeps_only_branches() {
        let template = compile(
            "<Choose>\n  <When data=\"posts.length\"><p>a</p></When>\n  <p>stray</p>\n  <Otherwise><p>b</p></Otherwise>\n  <Otherwise><p>c</p></Otherwise>\n</Choose>",
        );

        let choose = &template.ast()[0];
        assert_eq!(tags(choose.children()), vec!["When", "Otherwise"]);
        assert_eq!(
            kinds(&template),
            vec![ViolationKind::MisplacedBranch, ViolationKind::MisplacedBranch]
        );
    }

    #[test]
    fn test_stats() {
        let template = compile("<div><p>hi</p></div><br>");
        assert_eq!(
            template.stats(),
            TemplateStats {
                node_count: 4,
                max_depth: 2,
                size_bytes: 24,
            }
        );
    }

    #[test]
    fn test_byte_budget() {
        let config = ValidationConfig {
            max_bytes: 8,
            ..Default::default()
        };
        assert_eq!(
            Compiler::new(ComponentRegistry::builtin(), config).compile("<p>too long</p>"),
            Err(TemplateError::TooComplex {
                limit: Limit::Bytes,
                actual: 15,
                max: 8,
            })
        );
    }

    #[test]
    fn test_compile_bytes_rejects_invalid_utf8() {
        let compiler = Compiler::new(ComponentRegistry::builtin(), ValidationConfig::default());
        assert!(matches!(
            compiler.compile_bytes(&[0x3c, 0x70, 0xff, 0xfe]),
            Err(TemplateError::Malformed { .. })
        ));
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let source = "<Show data=\"posts.length\"><PostList limit=\"3\"></PostList></Show>";
        let first = compile(source);
        let second = compile(source);

        assert_eq!(first.ast(), second.ast());
        assert_eq!(first.source_hash(), second.source_hash());
        assert_eq!(first.content_hash(), second.content_hash());
    }

    #[test]
    fn test_source_hash_depends_on_mode() {
        assert_ne!(
            source_hash("<p>x</p>", TemplateMode::Basic),
            source_hash("<p>x</p>", TemplateMode::Advanced)
        );
        assert_eq!(source_hash("<p>x</p>", TemplateMode::Basic).len(), 64);
    }

    #[test]
    fn test_content_hash_ignores_dropped_markup() {
        let clean = compile("<p>hi</p>");
        let dirty = compile("<script>x</script><p>hi</p>");
        assert_ne!(clean.source_hash(), dirty.source_hash());
        assert_eq!(clean.content_hash(), dirty.content_hash());
    }

    #[test]
    fn test_serializes_component_as_tag_name() {
        let template = compile("<DisplayName></DisplayName>");
        let json = serde_json::to_value(template.ast()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"type": "component", "component": "DisplayName", "props": {}, "children": []}])
        );
    }
}
