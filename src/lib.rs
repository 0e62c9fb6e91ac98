//! # browserman
//!
//! HTTP front door and job plumbing for [`browserman_agent`].
//!
//! A client posts a goal to `/start`, receives a `call_id`, and follows the
//! session's events at `/status/{call_id}` as server-sent events:
//!
//! ```text
//! data: {"text":"<function=navigate_to>{\"url\": \"https://modal.com\"}</function>"}
//!
//! data: {"image":"iVBORw0KGgo..."}
//!
//! data: {"done":true}
//! ```
//!
//! Each job gets its own browser and runs as one tokio task. Cookies posted
//! to `/cookies` are shared across jobs by hostname.

pub mod jobs;
pub mod server;
pub mod transport;

use browserman_agent::config::schema::substituted;
use browserman_agent::{AgentConfig, Params};
use serde::Deserialize;
use std::path::Path;

pub use jobs::{EokaLauncher, JobManager, JobStatus, JobSummary, Launcher};
pub use server::{AppState, ServerConfig};
pub use transport::EventLog;

/// Whole config file: the agent's sections plus `server`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn load_with_params<P: AsRef<Path>>(
        path: P,
        params: &Params,
    ) -> browserman_agent::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_with_params(&content, params)
    }

    pub fn parse_with_params(yaml: &str, params: &Params) -> browserman_agent::Result<Self> {
        let config: AppConfig = serde_yaml::from_value(substituted(yaml, params)?)?;
        config.agent.validate()?;
        if config.server.bind.trim().is_empty() {
            return Err(browserman_agent::Error::Config(
                "server.bind is required".into(),
            ));
        }
        if config.server.job_ttl_secs == 0 {
            return Err(browserman_agent::Error::Config(
                "server.job_ttl_secs must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}
