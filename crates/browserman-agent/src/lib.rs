//! # browserman-agent
//!
//! Drives a live browser toward a natural-language goal. Each step observes
//! the page, asks a vision model what to do next, turns the free-text reply
//! into an [`Action`] and executes it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use browserman_agent::{
//!     Agent, CookieJar, EokaDriver, FsArtifactStore, HttpModel, Session, Config,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> browserman_agent::Result<()> {
//! let config = Config::load("browserman.yaml")?;
//! let agent = Agent::new(
//!     config.agent.clone(),
//!     Arc::new(HttpModel::new(&config.agent.model)?),
//!     Arc::new(CookieJar::in_memory()),
//!     Arc::new(FsArtifactStore::new(&config.agent.storage.artifacts_dir)),
//! );
//!
//! let (browser, driver) = EokaDriver::launch(&config.agent.browser).await?;
//! let mut session = Session::new("job-1", "find the opening hours of the louvre");
//! let events = browserman_agent::events::LogSink;
//! let report = agent.drive(&mut session, &driver, &events).await?;
//! println!("{:?}", report.answer);
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod artifacts;
pub mod config;
pub mod cookies;
pub mod dom;
pub mod driver;
pub mod events;
pub mod locator;
pub mod model;
pub mod observe;
pub mod prompt;
pub mod resolver;
pub mod session;

pub use action::{parse_action, Action, ActionKind};
pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use config::{
    AgentConfig, BrowserConfig, Config, ModelConfig, Params, PromptConfig, SessionConfig,
    StorageConfig,
};
pub use cookies::{CookieJar, CookieRecord, CookieStore};
pub use driver::{Driver, EokaDriver, ElementHandle, LoadState, Rect, Role, Viewport};
pub use events::{Event, EventSink};
pub use model::{HttpModel, Model};
pub use session::{Agent, Session, SessionReport, SessionState};

/// Result type for browserman-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a session or fail configuration loading.
///
/// Parse failures and click failures are not represented here: they are
/// absorbed by the loop (see [`action::ParseError`] and
/// [`locator::ClickFailure`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("model did not produce a valid action after {attempts} attempts")]
    ResolutionExhausted { attempts: u32 },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether this error terminates the session in the `Failed` state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Browser(_) | Error::ResolutionExhausted { .. } | Error::Image(_)
        )
    }
}

impl From<eoka::Error> for Error {
    fn from(e: eoka::Error) -> Self {
        Error::Browser(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Model(e.to_string())
    }
}
