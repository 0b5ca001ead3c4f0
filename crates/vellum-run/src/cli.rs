use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::IntoDiagnostic;
use miette::miette;
use std::io::{self, BufWriter, Read, Write};
use std::{fs, path::PathBuf};
use vellum_lang::{
    ComponentRegistry, Config, CssIsolationMode, Engine, Identity, RenderOptions, RenderPath,
    ResidentDataContext, RolloutController, TemplateError, TemplateMode, Viewer,
};

#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(after_help = "# Examples:\n\n\
    ## To check a template and list what the sanitizer removed:\n\
    vellum validate profile.html\n\n\
    ## To render a template for a viewer:\n\
    vellum render profile.html --context context.json\n\n\
    ## To see which rendering path a viewer gets:\n\
    vellum rollout --enable --percent 30 viewer-1 viewer-2\n\n\
    ## To list the custom tags:\n\
    vellum tags")]
#[command(
    about = "vellum validates, compiles and renders user-authored profile templates.",
    long_about = None
)]
pub struct Cli {
    #[clap(flatten)]
    options: TemplateArgs,

    #[clap(flatten)]
    output: OutputArgs,

    #[clap(subcommand)]
    commands: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    Basic,
    Enhanced,
    Advanced,
}

impl From<Mode> for TemplateMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Basic => TemplateMode::Basic,
            Mode::Enhanced => TemplateMode::Enhanced,
            Mode::Advanced => TemplateMode::Advanced,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum CssMode {
    #[default]
    Inherit,
    Override,
    Disable,
}

impl From<CssMode> for CssIsolationMode {
    fn from(mode: CssMode) -> Self {
        match mode {
            CssMode::Inherit => CssIsolationMode::Inherit,
            CssMode::Override => CssIsolationMode::Override,
            CssMode::Disable => CssIsolationMode::Disable,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct TemplateArgs {
    /// Template mode, overriding VELLUM_TEMPLATE_MODE
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Maximum number of nodes, overriding VELLUM_MAX_NODES
    #[arg(long)]
    max_nodes: Option<usize>,

    /// Maximum nesting depth, overriding VELLUM_MAX_DEPTH
    #[arg(long)]
    max_depth: Option<usize>,

    /// Maximum template size in bytes, overriding VELLUM_MAX_BYTES
    #[arg(long)]
    max_bytes: Option<usize>,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct OutputArgs {
    /// Set output format
    #[arg(short = 'F', long, value_enum, default_value_t)]
    output_format: OutputFormat,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compile a template and report sanitizer violations without rendering
    Validate {
        /// Template file. Reads stdin when omitted
        file: Option<PathBuf>,
    },
    /// Compile a template and print its metadata, or the full AST as JSON
    Compile {
        /// Template file. Reads stdin when omitted
        file: Option<PathBuf>,
    },
    /// Render a template against a data context
    Render {
        /// Template file. Reads stdin when omitted
        file: Option<PathBuf>,
        /// JSON file holding the resident data context
        #[arg(short, long, value_name = "FILE")]
        context: Option<PathBuf>,
        /// Profile CSS isolation mode
        #[arg(long, value_enum, default_value_t)]
        css_mode: CssMode,
        /// Treat the profile as edited in the visual builder
        #[arg(long, default_value_t = false)]
        visual_builder: bool,
        /// Mark interactive components for hydration
        #[arg(long, default_value_t = false)]
        islands: bool,
    },
    /// Show the rollout bucket and rendering path for viewer ids
    Rollout {
        /// Viewer ids to route
        #[arg(required = true)]
        viewers: Vec<String>,
        /// Rollout percentage, overriding VELLUM_ROLLOUT_PERCENT
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: Option<u8>,
        /// Turn the compiled path on, overriding VELLUM_TEMPLATE_COMPILATION
        #[arg(long, default_value_t = false)]
        enable: bool,
    },
    /// List the custom tags templates may use
    Tags,
}

impl Cli {
    pub fn run(&self) -> miette::Result<()> {
        let config = self.config();
        crate::init_tracing(&config);
        let engine = Engine::new(config);

        let stdout = io::stdout();
        let mut handle = BufWriter::new(stdout.lock());

        let result = match &self.commands {
            Commands::Validate { file } => self.validate(&engine, file.as_ref(), &mut handle),
            Commands::Compile { file } => self.compile(&engine, file.as_ref(), &mut handle),
            Commands::Render {
                file,
                context,
                css_mode,
                visual_builder,
                islands,
            } => {
                let options = RenderOptions {
                    css_mode: (*css_mode).into(),
                    visual_builder: *visual_builder,
                    islands: *islands || engine.config().flags.template_islands,
                };
                self.render(&engine, file.as_ref(), context.as_ref(), options, &mut handle)
            }
            Commands::Rollout {
                viewers,
                percent,
                enable,
            } => self.rollout(engine.config(), viewers, *percent, *enable, &mut handle),
            Commands::Tags => self.tags(&mut handle),
        };

        handle.flush().into_diagnostic()?;
        engine.shutdown();
        result
    }

    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if std::env::var_os("VELLUM_LOG_LEVEL").is_none() {
            config.log_level = "vellum=warn".to_string();
        }

        if let Some(mode) = self.options.mode {
            config.validation.mode = mode.into();
        }
        if let Some(max_nodes) = self.options.max_nodes {
            config.validation.max_nodes = max_nodes;
        }
        if let Some(max_depth) = self.options.max_depth {
            config.validation.max_depth = max_depth;
            config.validation.max_depth = config.validation.effective_max_depth();
        }
        if let Some(max_bytes) = self.options.max_bytes {
            config.validation.max_bytes = max_bytes;
        }

        config
    }

    fn read_source(file: Option<&PathBuf>) -> miette::Result<String> {
        let bytes = match file {
            Some(file) => {
                if !file.exists() {
                    return Err(miette!("File not found: {}", file.display()));
                }
                fs::read(file).into_diagnostic()?
            }
            None => {
                let mut input = Vec::new();
                io::stdin().read_to_end(&mut input).into_diagnostic()?;
                input
            }
        };

        String::from_utf8(bytes).map_err(|e| {
            miette::Report::new(TemplateError::Malformed {
                message: e.to_string(),
            })
        })
    }

    fn read_context(file: Option<&PathBuf>) -> miette::Result<ResidentDataContext> {
        match file {
            Some(file) => {
                if !file.exists() {
                    return Err(miette!("File not found: {}", file.display()));
                }
                let content = fs::read_to_string(file).into_diagnostic()?;
                serde_json::from_str(&content)
                    .map_err(|e| miette!("Invalid context {}: {}", file.display(), e))
            }
            None => Ok(ResidentDataContext::new(
                Identity::new("owner", "owner"),
                Viewer::Anonymous,
            )),
        }
    }

    fn write_json<T: serde::Serialize>(handle: &mut impl Write, value: &T) -> miette::Result<()> {
        let json = serde_json::to_string_pretty(value).into_diagnostic()?;
        writeln!(handle, "{}", json).into_diagnostic()
    }

    fn validate(
        &self,
        engine: &Engine,
        file: Option<&PathBuf>,
        handle: &mut impl Write,
    ) -> miette::Result<()> {
        let source = Self::read_source(file)?;
        let report = engine.validate(&source);

        match self.output.output_format {
            OutputFormat::Json => Self::write_json(handle, &report)?,
            OutputFormat::Text => {
                if let Some(file) = file {
                    writeln!(handle, "{}", format!("Checking: {}", file.display()).bold())
                        .into_diagnostic()?;
                }
                for warning in report.warnings() {
                    writeln!(handle, "  {}: {}", "Warning".yellow().bold(), warning)
                        .into_diagnostic()?;
                }
                match (&report.error, report.stats) {
                    (Some(error), _) => {
                        writeln!(handle, "  {}: {}", "Error".red().bold(), error)
                            .into_diagnostic()?;
                    }
                    (None, Some(stats)) => {
                        writeln!(
                            handle,
                            "  {}: {} nodes, depth {}, {} bytes",
                            "Valid".green().bold(),
                            stats.node_count,
                            stats.max_depth,
                            stats.size_bytes
                        )
                        .into_diagnostic()?;
                    }
                    (None, None) => {}
                }
            }
        }

        match report.error {
            Some(error) => Err(miette::Report::new(error)),
            None => Ok(()),
        }
    }

    fn compile(
        &self,
        engine: &Engine,
        file: Option<&PathBuf>,
        handle: &mut impl Write,
    ) -> miette::Result<()> {
        let source = Self::read_source(file)?;
        let template = engine.compile(&source).map_err(miette::Report::new)?;

        match self.output.output_format {
            OutputFormat::Json => Self::write_json(handle, &*template),
            OutputFormat::Text => {
                let stats = template.stats();
                writeln!(handle, "source hash:      {}", template.source_hash()).into_diagnostic()?;
                writeln!(handle, "content hash:     {}", template.content_hash())
                    .into_diagnostic()?;
                writeln!(handle, "compiler version: {}", template.compiler_version())
                    .into_diagnostic()?;
                writeln!(handle, "mode:             {}", template.mode()).into_diagnostic()?;
                writeln!(
                    handle,
                    "stats:            {} nodes, depth {}, {} bytes",
                    stats.node_count, stats.max_depth, stats.size_bytes
                )
                .into_diagnostic()?;
                for violation in template.violations() {
                    writeln!(handle, "  {}: {}", "Warning".yellow().bold(), violation)
                        .into_diagnostic()?;
                }
                Ok(())
            }
        }
    }

    fn render(
        &self,
        engine: &Engine,
        file: Option<&PathBuf>,
        context: Option<&PathBuf>,
        options: RenderOptions,
        handle: &mut impl Write,
    ) -> miette::Result<()> {
        let source = Self::read_source(file)?;
        let context = Self::read_context(context)?;
        let template = engine.compile(&source).map_err(miette::Report::new)?;
        let result = vellum_lang::render_with_options(&template, &context, options);

        match self.output.output_format {
            OutputFormat::Json => Self::write_json(handle, &result),
            OutputFormat::Text => {
                writeln!(handle, "{}", result.content.to_markup_preview()).into_diagnostic()?;
                for warning in &result.warnings {
                    eprintln!("{}: {}", "Warning".yellow().bold(), warning);
                }
                for error in &result.errors {
                    eprintln!("{}: {}", "Error".red().bold(), error);
                }
                Ok(())
            }
        }
    }

    fn rollout(
        &self,
        config: &Config,
        viewers: &[String],
        percent: Option<u8>,
        enable: bool,
        handle: &mut impl Write,
    ) -> miette::Result<()> {
        let controller = RolloutController::new(
            enable || config.flags.template_compilation,
            percent.unwrap_or(config.flags.rollout_percent),
        );

        let routes = viewers
            .iter()
            .map(|viewer| {
                serde_json::json!({
                    "viewer": viewer,
                    "bucket": controller.bucket(viewer),
                    "percent": controller.percent(),
                    "path": controller.route(viewer),
                })
            })
            .collect::<Vec<_>>();

        match self.output.output_format {
            OutputFormat::Json => Self::write_json(handle, &routes),
            OutputFormat::Text => {
                for viewer in viewers {
                    let path = match controller.route(viewer) {
                        RenderPath::Compiled => "compiled".green(),
                        RenderPath::Legacy => "legacy".normal(),
                    };
                    writeln!(
                        handle,
                        "{}\tbucket {}\t{}",
                        viewer,
                        controller.bucket(viewer),
                        path
                    )
                    .into_diagnostic()?;
                }
                Ok(())
            }
        }
    }

    fn tags(&self, handle: &mut impl Write) -> miette::Result<()> {
        let registry = ComponentRegistry::builtin();

        match self.output.output_format {
            OutputFormat::Json => Self::write_json(handle, &registry.iter().collect::<Vec<_>>()),
            OutputFormat::Text => {
                for descriptor in registry.iter() {
                    let props = descriptor
                        .allowed_props
                        .iter()
                        .map(|schema| schema.name)
                        .collect::<Vec<_>>()
                        .join(", ");
                    writeln!(
                        handle,
                        "{} {:<9} {}",
                        format!("{:<14}", descriptor.tag_name).bold(),
                        descriptor.min_mode.to_string(),
                        descriptor.description
                    )
                    .into_diagnostic()?;
                    if !props.is_empty() {
                        writeln!(handle, "{:<24} props: {}", "", props).into_diagnostic()?;
                    }
                }
                Ok(())
            }
        }
    }
}
