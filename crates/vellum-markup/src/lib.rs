//! # vellum-markup: markup parsing for vellum profile templates
//!
//! This crate turns untrusted template source into a plain node tree. It
//! performs no validation and never fails; deciding what is allowed is the
//! job of the sanitizer in `vellum-lang`.
//!
//! ## Quick Start
//!
//! ```rust
//! use vellum_markup::{parse, TemplateNode};
//!
//! let parsed = parse("<div><p>Hello");
//! assert_eq!(parsed.root.to_markup(), "<div><p>Hello</p></div>");
//! assert!(matches!(parsed.root, TemplateNode::Element(_)));
//! ```
//!
//! Tag and attribute names are lowercased by the parser, so `<IfOwner>` and
//! `<ifowner>` produce the same node. Callers that give tags a meaning of
//! their own pass them to [`parse_with_components`], which keeps those tags
//! where the author wrote them.
mod node;
mod parser;

pub use node::{
    Attributes, Descendants, Element, ROOT_TAG, TemplateNode, VOID_TAGS, escape_attribute,
    escape_text, write_attributes,
};
pub use parser::{MAX_NESTING, ParsedTemplate, parse, parse_with_components};
