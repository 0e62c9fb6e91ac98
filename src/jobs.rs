//! Job registry: one task and one browser per goal.

use async_trait::async_trait;
use browserman_agent::{
    Agent, BrowserConfig, Driver, EokaDriver, Error, Event, EventSink, Session, SessionReport,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::EventLog;

/// A browser context owned by a single job.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    fn driver(&self) -> &dyn Driver;
    async fn close(self: Box<Self>) -> browserman_agent::Result<()>;
}

/// Opens a fresh [`BrowserContext`] per job.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> browserman_agent::Result<Box<dyn BrowserContext>>;
}

/// Launches a dedicated eoka browser for each job.
pub struct EokaLauncher {
    config: BrowserConfig,
}

impl EokaLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

struct EokaContext {
    browser: eoka::Browser,
    driver: EokaDriver,
}

#[async_trait]
impl BrowserContext for EokaContext {
    fn driver(&self) -> &dyn Driver {
        &self.driver
    }

    async fn close(self: Box<Self>) -> browserman_agent::Result<()> {
        let EokaContext { browser, driver } = *self;
        drop(driver);
        browser.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Launcher for EokaLauncher {
    async fn launch(&self) -> browserman_agent::Result<Box<dyn BrowserContext>> {
        let (browser, driver) = EokaDriver::launch(&self.config).await?;
        Ok(Box::new(EokaContext { browser, driver }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

pub struct Job {
    pub id: Uuid,
    pub goal: String,
    pub started_at: DateTime<Utc>,
    pub events: Arc<EventLog>,
}

impl Job {
    /// Finished more than `ttl` ago.
    fn expired(&self, ttl: Duration) -> bool {
        self.events
            .finished_at()
            .is_some_and(|at| at.elapsed() >= ttl)
    }

    pub fn status(&self) -> JobStatus {
        match self.events.outcome() {
            None => JobStatus::Running,
            Some(Event::Done { error: Some(_), .. }) => JobStatus::Failed,
            Some(_) => JobStatus::Done,
        }
    }

    pub fn summary(&self) -> JobSummary {
        let error = match self.events.outcome() {
            Some(Event::Done { error, .. }) => error,
            _ => None,
        };
        JobSummary {
            call_id: self.id,
            goal: self.goal.clone(),
            status: self.status(),
            error,
            events: self.events.len(),
            started_at: self.started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub call_id: Uuid,
    pub goal: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: usize,
    pub started_at: DateTime<Utc>,
}

/// How long a finished job stays addressable unless configured otherwise.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(3600);

/// Spawns sessions and keeps their event logs addressable by id until
/// `ttl` after they finish.
pub struct JobManager {
    agent: Agent,
    launcher: Arc<dyn Launcher>,
    jobs: DashMap<Uuid, Arc<Job>>,
    ttl: Duration,
}

impl JobManager {
    pub fn new(agent: Agent, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            agent,
            launcher,
            jobs: DashMap::new(),
            ttl: DEFAULT_JOB_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop every job that finished more than `ttl` ago. Subscribers already
    /// streaming keep their log until they are done.
    pub fn evict_finished(&self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.expired(self.ttl));
        let evicted = before.saturating_sub(self.jobs.len());
        if evicted > 0 {
            debug!("evicted {} finished jobs", evicted);
        }
        evicted
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Job>> {
        let job = self.jobs.get(id).map(|j| Arc::clone(j.value()))?;
        if job.expired(self.ttl) {
            self.jobs.remove(id);
            return None;
        }
        Some(job)
    }

    /// Start a session for `goal` in the background and return its id.
    pub fn spawn(&self, goal: impl Into<String>) -> Uuid {
        self.evict_finished();
        let id = Uuid::new_v4();
        let job = Arc::new(Job {
            id,
            goal: goal.into(),
            started_at: Utc::now(),
            events: Arc::new(EventLog::new()),
        });
        self.jobs.insert(id, Arc::clone(&job));

        let agent = self.agent.clone();
        let launcher = Arc::clone(&self.launcher);
        tokio::spawn(async move {
            run_job(agent, launcher, job).await;
        });
        id
    }

    /// Events of a job, replayed from the start.
    pub fn events(&self, id: &Uuid) -> Option<Arc<EventLog>> {
        self.get(id).map(|j| Arc::clone(&j.events))
    }
}

/// Drive `session` on `context` under the session timeout, then close the
/// browser. A failed close is only logged.
///
/// Exactly one `done` event reaches `events`: from the session itself, or
/// from here when the timeout fires.
pub async fn run_session(
    agent: &Agent,
    context: Box<dyn BrowserContext>,
    session: &mut Session,
    events: &dyn EventSink,
) -> browserman_agent::Result<SessionReport> {
    let timeout = agent.config().session.timeout();
    let outcome =
        tokio::time::timeout(timeout, agent.drive(session, context.driver(), events)).await;

    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            let message = format!("session timed out after {}s", timeout.as_secs());
            events.emit(Event::failed(message.clone())).await;
            Err(Error::Timeout(message))
        }
    };

    if let Err(e) = context.close().await {
        warn!("job {}: failed to close browser: {}", session.job_id(), e);
    }
    result
}

/// Run one job to completion. Always closes the browser and always leaves
/// exactly one `done` event in the log.
pub async fn run_job(agent: Agent, launcher: Arc<dyn Launcher>, job: Arc<Job>) {
    let events = job.events.as_ref();
    let context = match launcher.launch().await {
        Ok(context) => context,
        Err(e) => {
            warn!("job {}: browser launch failed: {}", job.id, e);
            events.emit(Event::failed(e.to_string())).await;
            return;
        }
    };

    let mut session = Session::new(job.id.to_string(), job.goal.clone());
    match run_session(&agent, context, &mut session, events).await {
        Ok(report) => info!("job {}: done in {} steps", job.id, report.steps),
        Err(e) => warn!("job {}: {}", job.id, e),
    }
}
