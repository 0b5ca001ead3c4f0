use crate::cache::{CacheStats, TemplateCache};
use crate::compiler::{CompiledTemplate, Compiler, CompilerVersion, source_hash};
use crate::config::{CompilePolicy, Config};
use crate::context::ResidentDataContext;
use crate::css::CssIsolationMode;
use crate::error::TemplateError;
use crate::interpreter::{RenderOptions, RenderResult, render_with_options};
use crate::registry::ComponentRegistry;
use crate::rollout::{RenderPath, RolloutController};
use crate::{ValidationReport, validate_with};
use dashmap::DashMap;
use smol_str::SmolStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct LastGoodEntry {
    template: Arc<CompiledTemplate>,
    last_access: AtomicU64,
}

/// Last template that compiled for each template id, bounded like the
/// template cache and evicting the least recently used id.
#[derive(Debug)]
struct LastGood {
    entries: DashMap<SmolStr, LastGoodEntry>,
    capacity: usize,
    clock: AtomicU64,
}

impl LastGood {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn get(&self, template_id: &str) -> Option<Arc<CompiledTemplate>> {
        self.entries.get(template_id).map(|entry| {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&entry.template)
        })
    }

    fn insert(&self, template_id: &str, template: Arc<CompiledTemplate>) {
        if self.capacity == 0 {
            return;
        }

        while self.entries.len() >= self.capacity && !self.entries.contains_key(template_id) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_access.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    tracing::debug!(template_id = %key, "last known good template evicted");
                }
                None => break,
            }
        }

        self.entries.insert(
            SmolStr::new(template_id),
            LastGoodEntry {
                template,
                last_access: AtomicU64::new(self.tick()),
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Long-lived service owning the template cache.
///
/// Create one at startup, share it across request handlers and call
/// [`Engine::shutdown`] when the process stops serving.
#[derive(Debug)]
pub struct Engine {
    registry: &'static ComponentRegistry,
    config: Config,
    cache: Arc<TemplateCache>,
    last_good: LastGood,
    rollout: RolloutController,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(TemplateCache::new(config.cache.capacity, config.cache.ttl));
        Self::with_cache(config, cache)
    }

    pub fn with_cache(config: Config, cache: Arc<TemplateCache>) -> Self {
        Self {
            registry: ComponentRegistry::builtin(),
            rollout: RolloutController::from_flags(&config.flags),
            last_good: LastGood::new(config.cache.capacity),
            config,
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    fn compiler(&self) -> Compiler<'static> {
        Compiler::new(self.registry, self.config.validation)
    }

    /// Returns the cached template for `source`, compiling on a miss.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledTemplate>, TemplateError> {
        let key = source_hash(source, self.config.validation.mode);
        if let Some(template) = self.cache.get(&key, CompilerVersion::CURRENT) {
            return Ok(template);
        }

        let template = Arc::new(self.compiler().compile(source)?);
        self.cache.put(Arc::clone(&template));
        Ok(template)
    }

    pub fn validate(&self, source: &str) -> ValidationReport {
        validate_with(source, &self.config.validation)
    }

    pub fn render(
        &self,
        compiled: &CompiledTemplate,
        context: &ResidentDataContext,
        css_mode: CssIsolationMode,
    ) -> RenderResult {
        render_with_options(
            compiled,
            context,
            RenderOptions {
                css_mode,
                visual_builder: false,
                islands: self.config.flags.template_islands,
            },
        )
    }

    /// Viewer-facing render. A template that fails to compile falls back to
    /// the last version that compiled for `template_id`, or to an empty
    /// page. The failure itself is logged and never returned.
    pub fn render_for_viewer(
        &self,
        template_id: &str,
        source: &str,
        context: &ResidentDataContext,
        css_mode: CssIsolationMode,
    ) -> RenderResult {
        let template = match self.compile(source) {
            Ok(template) => {
                self.last_good.insert(template_id, Arc::clone(&template));
                template
            }
            Err(e) => {
                tracing::warn!(template_id, error = %e, "template failed to compile, serving last known good");
                self.last_good
                    .get(template_id)
                    .unwrap_or_else(|| {
                        Arc::new(CompiledTemplate::empty(self.config.validation.mode))
                    })
            }
        };

        self.render(&template, context, css_mode)
    }

    /// Called when the owner saves an edit. The entry for the previous source
    /// is always dropped; with the eager policy the new source is compiled
    /// and cached immediately.
    pub fn on_save(
        &self,
        template_id: &str,
        previous_source: Option<&str>,
        source: &str,
    ) -> Result<Option<Arc<CompiledTemplate>>, TemplateError> {
        if let Some(previous) = previous_source {
            let key = source_hash(previous, self.config.validation.mode);
            if self.cache.invalidate(&key) {
                tracing::debug!(template_id, "dropped cached template for previous source");
            }
        }

        match self.config.compile_policy {
            CompilePolicy::Lazy => Ok(None),
            CompilePolicy::Eager => {
                let template = self.compile(source)?;
                self.last_good.insert(template_id, Arc::clone(&template));
                Ok(Some(template))
            }
        }
    }

    pub fn route(&self, viewer_id: &str) -> RenderPath {
        self.rollout.route(viewer_id)
    }

    pub fn should_use_compiled_path(&self, viewer_id: &str) -> bool {
        self.route(viewer_id) == RenderPath::Compiled
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of template ids with a last known good template.
    pub fn last_good_len(&self) -> usize {
        self.last_good.len()
    }

    pub fn shutdown(&self) {
        let stats = self.cache.stats();
        self.cache.clear();
        self.last_good.clear();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "template engine shut down"
        );
    }
}
