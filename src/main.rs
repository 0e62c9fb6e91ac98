use anyhow::Context;
use async_trait::async_trait;
use browserman::jobs::run_session;
use browserman::{AppConfig, AppState, EokaLauncher, JobManager, Launcher};
use browserman_agent::{
    Agent, CookieJar, Event, EventSink, FsArtifactStore, HttpModel, Params, Session,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "browserman")]
#[command(about = "Drive a browser toward a goal with a vision model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Listen address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one session in the foreground, printing events as JSON lines
    Run {
        /// What the agent should accomplish
        goal: String,

        #[command(flatten)]
        config: ConfigArgs,

        /// Show the browser window (overrides config)
        #[arg(long)]
        headed: bool,
    },
    /// Validate the config file without running
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<AppConfig> {
        let params = Params::from_args(&self.params)?;
        let config = match self.config {
            Some(ref path) => AppConfig::load_with_params(path, &params)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AppConfig::parse_with_params("", &params)?,
        };
        Ok(config)
    }
}

/// Prints each event as one JSON line.
struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn emit(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("unprintable event: {}", e),
        }
    }
}

fn open_cookies(path: Option<&Path>) -> anyhow::Result<Arc<CookieJar>> {
    Ok(Arc::new(match path {
        Some(path) => CookieJar::open(path)
            .with_context(|| format!("opening cookie file {}", path.display()))?,
        None => CookieJar::in_memory(),
    }))
}

fn build_agent(config: &AppConfig) -> anyhow::Result<Agent> {
    let agent = &config.agent;
    Ok(Agent::new(
        agent.clone(),
        Arc::new(HttpModel::new(&agent.model)?),
        open_cookies(agent.storage.cookies_path.as_deref())?,
        Arc::new(FsArtifactStore::new(&agent.storage.artifacts_dir)),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity, RUST_LOG wins when set
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    match cli.command {
        Command::Check { config } => {
            let app = config.load()?;
            let a = &app.agent;
            println!("Config valid");
            println!("  Model: {}", a.model.endpoint);
            println!(
                "  Browser: headless={} viewport={}x{}",
                a.browser.headless, a.browser.viewport.width, a.browser.viewport.height
            );
            println!(
                "  Session: {} steps, {} attempts, {}s timeout",
                a.session.max_steps, a.session.max_attempts, a.session.timeout_secs
            );
            println!("  Artifacts: {}", a.storage.artifacts_dir.display());
            match a.storage.cookies_path {
                Some(ref path) => println!("  Cookies: {}", path.display()),
                None => println!("  Cookies: in memory"),
            }
            println!("  Server: {}", app.server.bind);
        }
        Command::Serve { config, bind } => {
            let mut app = config.load()?;
            if let Some(bind) = bind {
                app.server.bind = bind;
            }
            let agent = build_agent(&app)?;
            let launcher = Arc::new(EokaLauncher::new(app.agent.browser.clone()));
            let jobs = JobManager::new(agent, launcher).with_ttl(app.server.job_ttl());
            let state = AppState {
                jobs: Arc::new(jobs),
            };
            browserman::server::serve(state, &app.server).await?;
        }
        Command::Run {
            goal,
            config,
            headed,
        } => {
            let mut app = config.load()?;
            if headed {
                app.agent.browser.headless = false;
            }
            let agent = build_agent(&app)?;
            let context = EokaLauncher::new(app.agent.browser.clone()).launch().await?;
            let mut session = Session::new(uuid::Uuid::new_v4().to_string(), goal);

            match run_session(&agent, context, &mut session, &StdoutSink).await {
                Ok(report) => {
                    eprintln!("✓ Done in {} steps", report.steps);
                    if let Some(answer) = report.answer {
                        eprintln!("  Answer: {}", answer);
                    }
                }
                Err(e) => {
                    eprintln!("✗ Failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
