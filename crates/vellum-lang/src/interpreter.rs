//! Binds a compiled template to a resident data context.
//!
//! The walk is depth-first and single-pass. Conditional components splice
//! their children into the parent when their gate opens. Leaf components
//! are rendered by pure functions and isolated from each other, so a
//! failing leaf becomes a placeholder instead of aborting the page.
use crate::compiler::{CompiledNode, CompiledTemplate, Props};
use crate::context::ResidentDataContext;
use crate::css::{ComponentCssRenderMode, CssIsolationMode, component_css_mode};
use crate::error::{Violation, ViolationKind};
use crate::leaf::{ResolvedProps, render_leaf};
use crate::registry::{ComponentDescriptor, ComponentKind, Gate, LeafKind, PropValue, Structure};
use serde::Serialize;
use smol_str::SmolStr;
use std::panic::{self, AssertUnwindSafe};
use vellum_markup::{Attributes, VOID_TAGS, escape_attribute, escape_text, write_attributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    pub css_mode: CssIsolationMode,
    pub visual_builder: bool,
    /// Mark interactive leaves for client-side hydration.
    pub islands: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderNode {
    Text {
        content: String,
    },
    Markup {
        tag: SmolStr,
        attributes: Attributes,
        children: Vec<RenderNode>,
    },
    Component {
        component: &'static str,
        props: ResolvedProps,
        hydrate: bool,
    },
    /// Stands in for a leaf that failed to render.
    Placeholder {
        component: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderTree {
    pub css_mode: ComponentCssRenderMode,
    pub nodes: Vec<RenderNode>,
}

impl RenderTree {
    pub fn empty(css_mode: ComponentCssRenderMode) -> Self {
        Self {
            css_mode,
            nodes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Escaped markup for author previews. Components are emitted as
    /// `vellum-component` elements carrying their resolved props.
    pub fn to_markup_preview(&self) -> String {
        let mut out = String::new();
        self.nodes
            .iter()
            .for_each(|node| write_preview(node, &mut out));
        out
    }
}

fn write_preview(node: &RenderNode, out: &mut String) {
    match node {
        RenderNode::Text { content } => out.push_str(&escape_text(content)),
        RenderNode::Markup {
            tag,
            attributes,
            children,
        } => {
            out.push('<');
            out.push_str(tag);
            write_attributes(attributes.iter(), out);
            out.push('>');

            if VOID_TAGS.contains(&tag.as_str()) {
                return;
            }

            children.iter().for_each(|child| write_preview(child, out));
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        RenderNode::Component {
            component,
            props,
            hydrate,
        } => {
            let props = serde_json::to_string(props).unwrap_or_else(|_| "{}".to_string());
            out.push_str("<vellum-component data-component=\"");
            out.push_str(component);
            out.push_str("\" data-props=\"");
            out.push_str(&escape_attribute(&props));
            out.push('"');
            if *hydrate {
                out.push_str(" data-hydrate=\"true\"");
            }
            out.push_str("></vellum-component>");
        }
        RenderNode::Placeholder { component } => {
            out.push_str("<vellum-placeholder data-component=\"");
            out.push_str(component);
            out.push_str("\"></vellum-placeholder>");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderResult {
    pub content: RenderTree,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub fn render(
    compiled: &CompiledTemplate,
    context: &ResidentDataContext,
    css_mode: CssIsolationMode,
) -> RenderResult {
    render_with_options(
        compiled,
        context,
        RenderOptions {
            css_mode,
            ..Default::default()
        },
    )
}

pub fn render_with_options(
    compiled: &CompiledTemplate,
    context: &ResidentDataContext,
    options: RenderOptions,
) -> RenderResult {
    let mut interpreter = Interpreter::new(context, options);
    let mut nodes = Vec::with_capacity(compiled.ast().len());
    interpreter.walk(compiled.ast(), &mut nodes);

    RenderResult {
        content: RenderTree {
            css_mode: component_css_mode(options.css_mode, options.visual_builder),
            nodes,
        },
        warnings: interpreter.warnings,
        errors: interpreter.errors,
    }
}

struct Interpreter<'a> {
    context: &'a ResidentDataContext,
    options: RenderOptions,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl<'a> Interpreter<'a> {
    fn new(context: &'a ResidentDataContext, options: RenderOptions) -> Self {
        Self {
            context,
            options,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn walk(&mut self, nodes: &[CompiledNode], out: &mut Vec<RenderNode>) {
        for node in nodes {
            match node {
                CompiledNode::Text { content } => out.push(RenderNode::Text {
                    content: content.clone(),
                }),
                CompiledNode::Markup {
                    tag,
                    attributes,
                    children,
                } => {
                    let mut rendered = Vec::with_capacity(children.len());
                    self.walk(children, &mut rendered);
                    out.push(RenderNode::Markup {
                        tag: tag.clone(),
                        attributes: attributes.clone(),
                        children: rendered,
                    });
                }
                CompiledNode::Component {
                    component,
                    props,
                    children,
                } => self.component(component, props, children, out),
            }
        }
    }

    fn component(
        &mut self,
        descriptor: &'static ComponentDescriptor,
        props: &Props,
        children: &[CompiledNode],
        out: &mut Vec<RenderNode>,
    ) {
        match descriptor.kind {
            ComponentKind::Structural(Structure::Choose) => {
                if let Some(branch) = self.choose(children) {
                    self.walk(branch.children(), out);
                }
            }
            ComponentKind::Conditional(Gate::Show) => {
                if self.predicate(descriptor, props) {
                    self.walk(children, out);
                }
            }
            ComponentKind::Conditional(Gate::IfOwner) => {
                if self.context.viewer_is_owner() {
                    self.walk(children, out);
                }
            }
            ComponentKind::Conditional(Gate::IfVisitor) => {
                if !self.context.viewer_is_owner() {
                    self.walk(children, out);
                }
            }
            // Branches only render through their Choose.
            ComponentKind::Conditional(Gate::When | Gate::Otherwise) => {}
            ComponentKind::Leaf(kind) => out.push(self.leaf(descriptor, kind, props)),
        }
    }

    /// Picks at most one branch: the first `When` whose predicate holds,
    /// else the first `Otherwise`.
    fn choose<'n>(&mut self, branches: &'n [CompiledNode]) -> Option<&'n CompiledNode> {
        let mut otherwise = None;

        for branch in branches {
            let CompiledNode::Component {
                component, props, ..
            } = branch
            else {
                continue;
            };

            match component.kind {
                ComponentKind::Conditional(Gate::When) => {
                    if self.predicate(component, props) {
                        return Some(branch);
                    }
                }
                ComponentKind::Conditional(Gate::Otherwise) => {
                    otherwise.get_or_insert(branch);
                }
                _ => {}
            }
        }

        otherwise
    }

    /// Gate shared by `Show` and `When`. Anything that cannot be resolved
    /// evaluates to false.
    fn predicate(&mut self, descriptor: &ComponentDescriptor, props: &Props) -> bool {
        let Some(path) = props.get("data").and_then(PropValue::as_path) else {
            self.warn(descriptor, "no valid data path, treated as false".to_string());
            return false;
        };

        let Some(value) = path.resolve(self.context) else {
            self.warn(
                descriptor,
                format!("{} does not resolve, treated as false", path),
            );
            return false;
        };

        match props.get("equals").and_then(PropValue::as_str) {
            Some(expected) => value.equals(expected),
            None => value.is_truthy(),
        }
    }

    fn warn(&mut self, descriptor: &ComponentDescriptor, detail: String) {
        let violation = Violation::new(
            ViolationKind::DataPathUnresolved,
            descriptor.tag_name,
            detail,
        );
        tracing::debug!(%violation, "conditional evaluated to false");
        self.warnings.push(violation.to_string());
    }

    fn leaf(
        &mut self,
        descriptor: &'static ComponentDescriptor,
        kind: LeafKind,
        props: &Props,
    ) -> RenderNode {
        let context = self.context;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| render_leaf(kind, props, context)));

        let failure = match outcome {
            Ok(Ok(resolved)) => {
                return RenderNode::Component {
                    component: descriptor.tag_name,
                    props: resolved,
                    hydrate: self.options.islands && descriptor.interactive,
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "renderer panicked".to_string(),
        };

        tracing::warn!(component = descriptor.tag_name, error = %failure, "leaf component failed");
        self.errors
            .push(format!("<{}> could not be rendered", descriptor.tag_name));
        RenderNode::Placeholder {
            component: descriptor.tag_name,
        }
    }
}
