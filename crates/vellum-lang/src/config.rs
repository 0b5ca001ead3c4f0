use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;
use vellum_markup::MAX_NESTING;

/// Template richness stored with each profile. Each mode unlocks a larger
/// subset of the custom tag vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    Basic,
    Enhanced,
    #[default]
    Advanced,
}

impl FromStr for TemplateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(TemplateMode::Basic),
            "enhanced" => Ok(TemplateMode::Enhanced),
            "advanced" => Ok(TemplateMode::Advanced),
            other => Err(format!("unknown template mode '{}'", other)),
        }
    }
}

impl Display for TemplateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateMode::Basic => write!(f, "basic"),
            TemplateMode::Enhanced => write!(f, "enhanced"),
            TemplateMode::Advanced => write!(f, "advanced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub max_nodes: usize,
    /// Never larger than the parser's nesting cap.
    pub max_depth: usize,
    pub max_bytes: usize,
    pub mode: TemplateMode,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_nodes: 2000,
            max_depth: 32,
            max_bytes: 64 * 1024,
            mode: TemplateMode::default(),
        }
    }
}

impl ValidationConfig {
    pub fn with_mode(mut self, mode: TemplateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn effective_max_depth(&self) -> usize {
        self.max_depth.min(MAX_NESTING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Global switch for the compiled rendering path.
    pub template_compilation: bool,
    pub template_islands: bool,
    /// Share of viewers routed to the compiled path, 0 to 100.
    pub rollout_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilePolicy {
    /// Compile on the first render that misses the cache.
    #[default]
    Lazy,
    /// Also compile when the author saves.
    Eager,
}

impl FromStr for CompilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(CompilePolicy::Lazy),
            "eager" => Ok(CompilePolicy::Eager),
            other => Err(format!("unknown compile policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
    pub flags: FeatureFlags,
    pub compile_policy: CompilePolicy,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            cache: CacheConfig::default(),
            flags: FeatureFlags::default(),
            compile_policy: CompilePolicy::default(),
            log_level: "vellum=info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn read_flag(name: &str, target: &mut bool) {
    if let Ok(value) = env::var(name) {
        match parse_flag(&value) {
            Some(flag) => *target = flag,
            None => eprintln!(
                "Warning: Invalid {} value '{}', using default {}",
                name, value, target
            ),
        }
    }
}

fn read_number<T>(name: &str, target: &mut T)
where
    T: FromStr + Display,
{
    if let Ok(value) = env::var(name) {
        match value.trim().parse::<T>() {
            Ok(number) => *target = number,
            Err(_) => eprintln!(
                "Warning: Invalid {} value '{}', using default {}",
                name, value, target
            ),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        read_flag(
            "VELLUM_TEMPLATE_COMPILATION",
            &mut config.flags.template_compilation,
        );
        read_flag("VELLUM_TEMPLATE_ISLANDS", &mut config.flags.template_islands);

        let mut percent = u32::from(config.flags.rollout_percent);
        read_number("VELLUM_ROLLOUT_PERCENT", &mut percent);
        config.flags.rollout_percent = percent.min(100) as u8;

        read_number("VELLUM_MAX_NODES", &mut config.validation.max_nodes);
        read_number("VELLUM_MAX_DEPTH", &mut config.validation.max_depth);
        config.validation.max_depth = config.validation.effective_max_depth();
        read_number("VELLUM_MAX_BYTES", &mut config.validation.max_bytes);

        if let Ok(mode) = env::var("VELLUM_TEMPLATE_MODE") {
            match mode.parse::<TemplateMode>() {
                Ok(mode) => config.validation.mode = mode,
                Err(e) => eprintln!(
                    "Warning: {}, using default {}",
                    e, config.validation.mode
                ),
            }
        }

        read_number("VELLUM_CACHE_CAPACITY", &mut config.cache.capacity);

        let mut ttl_seconds = config.cache.ttl.map(|ttl| ttl.as_secs()).unwrap_or(0);
        read_number("VELLUM_CACHE_TTL_SECONDS", &mut ttl_seconds);
        config.cache.ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds));

        if let Ok(policy) = env::var("VELLUM_COMPILE_POLICY") {
            match policy.parse::<CompilePolicy>() {
                Ok(policy) => config.compile_policy = policy,
                Err(e) => eprintln!("Warning: {}, using default lazy", e),
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.log_level = log_level;
        } else if let Ok(log_level) = env::var("VELLUM_LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Ok(log_format) = env::var("VELLUM_LOG_FORMAT") {
            config.log_format = match log_format.to_lowercase().as_str() {
                "text" | "plain" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    eprintln!(
                        "Warning: Invalid VELLUM_LOG_FORMAT value '{}', using default text",
                        log_format
                    );
                    LogFormat::Text
                }
            };
        }

        config
    }
}
