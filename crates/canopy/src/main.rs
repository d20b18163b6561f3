use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use canopy::config::{self, APP_NAME, AppConfig, AppPaths};
use canopy::{CoordinatorHandle, CoordinatorRuntime, HttpProjectSource, UiEvent, WsConnector};
use canopy_protocol::SessionId;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn async_watch(ctx: RuntimeContext, cmd: WatchCommand) -> Result<()> {
    handle_watch(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Watch(cmd) => async_watch(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Canopy - live project/session updates for coding assistant workspaces.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the push channel and log live updates
    Watch(WatchCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct WatchCommand {
    /// Push channel URL (overrides channel.url)
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    /// Project to select on startup
    #[arg(long, value_name = "NAME")]
    project: Option<String>,
    /// Session to select on startup (requires --project)
    #[arg(long, value_name = "ID", requires = "project")]
    session: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
    /// The config file existed before this run.
    config_existed: bool,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config_existed = paths.config_file.exists();
        let config = config::load_or_init_config(&paths)?;
        Ok(Self {
            common,
            paths,
            config,
            config_existed,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if ctx.config_existed {
                if !force {
                    return Err(anyhow!(
                        "config already exists at {} (use --force to overwrite)",
                        ctx.paths.config_file.display()
                    ));
                }
                config::write_default_config(&ctx.paths.config_file)?;
            }
            info!("Wrote default config to {}", ctx.paths.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_watch(ctx: &RuntimeContext, cmd: WatchCommand) -> Result<()> {
    let url = cmd.url.unwrap_or_else(|| ctx.config.channel.url.clone());
    let connector = WsConnector::with_token(&url, ctx.config.channel.token.as_deref());
    let source = HttpProjectSource::new(&ctx.config.api.base_url, ctx.config.api.token.clone())
        .context("building project source")?;

    info!("Watching {}", url);
    let (runtime, handle) = CoordinatorRuntime::new(
        ctx.config.coordinator(),
        Arc::new(connector),
        Some(Arc::new(source)),
    );
    let events = handle.subscribe();

    match (cmd.project, cmd.session) {
        (Some(project), Some(session)) => {
            handle.select_session(project, SessionId::from_wire(&session))
        }
        (Some(project), None) => handle.select_project(Some(project)),
        _ => {}
    }

    let coordinator = tokio::spawn(runtime.run());
    follow_events(&handle, events, coordinator, tokio::signal::ctrl_c()).await
}

/// Report UI events until `stop` resolves or the coordinator ends on its own.
async fn follow_events(
    handle: &CoordinatorHandle,
    mut events: broadcast::Receiver<UiEvent>,
    mut coordinator: JoinHandle<()>,
    stop: impl Future<Output = io::Result<()>>,
) -> Result<()> {
    tokio::pin!(stop);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => report_event(&event),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} UI event(s)", missed),
                Err(RecvError::Closed) => break,
            },
            result = &mut stop => {
                result.context("listening for ctrl-c")?;
                info!("Shutting down");
                handle.shutdown();
                break;
            }
            joined = &mut coordinator => {
                joined.context("coordinator task failed")?;
                warn!("Coordinator stopped");
                return Ok(());
            }
        }
    }

    coordinator.await.context("coordinator task failed")?;
    Ok(())
}

fn report_event(event: &UiEvent) {
    match event {
        UiEvent::ConnectionChanged(state) => info!("Connection {}", state),
        UiEvent::ProjectsReplaced(projects) => {
            let sessions: usize = projects.iter().map(|p| p.sessions.len()).sum();
            info!(
                "Project list updated: {} project(s), {} session(s)",
                projects.len(),
                sessions
            );
        }
        UiEvent::SelectionChanged(selection) => info!(
            "Selection: project={} session={}",
            selection.project.as_deref().unwrap_or("-"),
            selection
                .session
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string())
        ),
        UiEvent::ProgressChanged(Some(progress)) => info!(
            "Loading {:?} {}/{}{}",
            progress.phase,
            progress.current.unwrap_or(0),
            progress.total.unwrap_or(0),
            progress
                .current_project
                .as_deref()
                .map(|p| format!(" ({p})"))
                .unwrap_or_default()
        ),
        UiEvent::ProgressChanged(None) => debug!("Loading indicator cleared"),
        UiEvent::ProcessingChanged {
            session_id,
            processing,
        } => info!(
            "Session {} {}",
            session_id,
            if *processing { "processing" } else { "idle" }
        ),
        UiEvent::ExternalChange {
            session_id,
            generation,
        } => info!(
            "Session {} changed on disk (reload #{})",
            session_id, generation
        ),
    }
}
