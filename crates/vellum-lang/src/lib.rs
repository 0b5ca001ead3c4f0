//! `vellum-lang` compiles and renders user-authored profile templates.
//!
//! Templates are untrusted markup with a closed set of custom tags. They are
//! parsed, sanitized against fixed allowlists, compiled into an immutable
//! AST and rendered against a per-request [`ResidentDataContext`].
//!
//! ## Examples
//!
//! ```rust
//! use vellum_lang::{CssIsolationMode, Identity, ResidentDataContext, ValidationConfig, Viewer};
//!
//! let source = r#"<Show data="posts.length" equals="0"><p>No posts found</p></Show>"#;
//! let compiled = vellum_lang::compile(source, &ValidationConfig::default()).unwrap();
//!
//! let context = ResidentDataContext::new(Identity::new("u1", "alice"), Viewer::Anonymous);
//! let result = vellum_lang::render(&compiled, &context, CssIsolationMode::Inherit);
//!
//! assert_eq!(result.content.to_markup_preview(), "<p>No posts found</p>");
//! assert!(result.warnings.is_empty());
//!
//! // Author feedback without rendering
//! let report = vellum_lang::validate("<script>alert(1)</script><p>hi</p>");
//! assert!(report.valid);
//! assert_eq!(report.violations.len(), 1);
//! ```
//!
//! Long-running services should hold an [`Engine`], which owns the template
//! cache and serves viewers with last-known-good fallback.
mod cache;
mod compiler;
mod config;
mod context;
mod css;
mod data_path;
mod engine;
mod error;
mod interpreter;
mod leaf;
mod registry;
mod rollout;
mod sanitizer;

use serde::Serialize;

pub use cache::{CacheStats, TemplateCache};
pub use compiler::{
    CompiledNode, CompiledTemplate, Compiler, CompilerVersion, Props, TemplateStats, source_hash,
};
pub use config::{
    CacheConfig, CompilePolicy, Config, FeatureFlags, LogFormat, TemplateMode, ValidationConfig,
};
pub use context::{
    Capability, GuestbookEntry, Identity, MediaKind, MediaRef, Post, ResidentDataContext, Viewer,
};
pub use css::{
    ComponentCssRenderMode, CssIsolationMode, KNOWN_PATTERNS, PatternHoist, component_css_mode,
    component_css_mode_from_str, detect_full_page_pattern,
};
pub use data_path::{DataPath, DataValue, IdentityField, UnknownDataPath};
pub use engine::Engine;
pub use error::{Limit, TemplateError, Violation, ViolationKind};
pub use interpreter::{
    RenderNode, RenderOptions, RenderResult, RenderTree, render, render_with_options,
};
pub use leaf::{LeafError, ResolvedProps};
pub use registry::{
    ComponentDescriptor, ComponentKind, ComponentRegistry, DataSource, Fallback, Gate, LeafKind,
    PropSchema, PropType, PropValue, REGISTRY_VERSION, Structure,
};
pub use rollout::{RenderPath, RolloutController, bucket, should_use_compiled_path};
pub use sanitizer::{SANITIZER_RULES_VERSION, is_safe_uri};

pub type TemplateResult = Result<CompiledTemplate, TemplateError>;

pub fn compile(source: &str, config: &ValidationConfig) -> TemplateResult {
    Compiler::new(ComponentRegistry::builtin(), *config).compile(source)
}

/// Like [`compile`] for raw bytes. Input that is not UTF-8 is `Malformed`.
pub fn compile_bytes(source: &[u8], config: &ValidationConfig) -> TemplateResult {
    Compiler::new(ComponentRegistry::builtin(), *config).compile_bytes(source)
}

/// Author-facing outcome of compiling a template without rendering it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub error: Option<TemplateError>,
    pub violations: Vec<Violation>,
    pub stats: Option<TemplateStats>,
    pub source_hash: String,
}

impl ValidationReport {
    pub fn warnings(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

pub fn validate(source: &str) -> ValidationReport {
    validate_with(source, &ValidationConfig::default())
}

pub fn validate_with(source: &str, config: &ValidationConfig) -> ValidationReport {
    let source_hash = source_hash(source, config.mode);

    match compile(source, config) {
        Ok(compiled) => ValidationReport {
            valid: true,
            error: None,
            violations: compiled.violations().to_vec(),
            stats: Some(compiled.stats()),
            source_hash,
        },
        Err(e) => ValidationReport {
            valid: false,
            error: Some(e),
            violations: Vec::new(),
            stats: None,
            source_hash,
        },
    }
}
