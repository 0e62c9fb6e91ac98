//! The per-goal session loop.
//!
//! ```text
//! Observing -> Resolving -> Executing -> Stabilizing -> Observing ...
//!                  |            |
//!                Failed        Done
//! ```
//!
//! Observing is skipped on the first step since nothing is loaded yet. The
//! loop ends in `Done` on a final answer or when the step budget runs out,
//! and in `Failed` on resolver exhaustion or any other fatal error (see
//! [`Error::is_fatal`](crate::Error::is_fatal)). Non-fatal errors from
//! navigation are logged and the loop moves on.

use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::action::Action;
use crate::artifacts::ArtifactStore;
use crate::config::AgentConfig;
use crate::cookies::{self, CookieStore};
use crate::dom;
use crate::driver::{Driver, LoadState};
use crate::events::{Event, EventSink};
use crate::locator::Locator;
use crate::model::Model;
use crate::observe::{self, Observation};
use crate::prompt::PromptBuilder;
use crate::resolver::{ResolveRequest, Resolver};
use crate::Result;

/// Appended to the history entry of a click that matched nothing.
const CLICK_FAILED_MARKER: &str = " [failed: no clickable element matched]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Observing,
    Resolving,
    Executing,
    Stabilizing,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Mutable state of one run. Owned by the task driving it.
#[derive(Debug)]
pub struct Session {
    job_id: String,
    goal: String,
    pub url: String,
    /// Raw DOM from the latest observation.
    pub dom: String,
    /// Link-only form of [`Session::dom`].
    pub dom_links: String,
    /// Every model reply, oldest first.
    pub history: Vec<String>,
    pub step: u32,
    /// Whether `click_button` is offered to the model next turn.
    pub use_buttons: bool,
    pub state: SessionState,
    pub answer: Option<String>,
}

impl Session {
    pub fn new(job_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            goal: goal.into(),
            url: String::new(),
            dom: String::new(),
            dom_links: String::new(),
            history: Vec::new(),
            step: 0,
            use_buttons: true,
            state: SessionState::Observing,
            answer: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    fn absorb(&mut self, observation: &Observation) {
        self.url = observation.url.clone();
        self.dom = observation.html.clone();
        self.dom_links = dom::links_only(&observation.html);
    }
}

/// Pass fatal errors through and keep going past the rest.
fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            warn!("continuing after {}", e);
            Ok(())
        }
        other => other,
    }
}

/// Summary of a session that ended in `Done`.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: SessionState,
    pub steps: u32,
    pub answer: Option<String>,
    pub history: Vec<String>,
}

/// Runs sessions against shared collaborators.
#[derive(Clone)]
pub struct Agent {
    config: AgentConfig,
    model: Arc<dyn Model>,
    cookies: Arc<dyn CookieStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn Model>,
        cookies: Arc<dyn CookieStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            model,
            cookies,
            artifacts,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    /// Drive `session` until it finishes.
    ///
    /// Always emits exactly one terminal event: `done` on success, or a
    /// `done` carrying the error message when the session fails.
    pub async fn drive(
        &self,
        session: &mut Session,
        driver: &dyn Driver,
        events: &dyn EventSink,
    ) -> Result<SessionReport> {
        let span = info_span!("session", job = %session.job_id);
        async {
            info!("starting: {}", session.goal);
            match self.run(session, driver, events).await {
                Ok(()) => {
                    session.state = SessionState::Done;
                    info!("done after {} steps", session.step);
                    events.emit(Event::done()).await;
                    Ok(SessionReport {
                        state: session.state,
                        steps: session.step,
                        answer: session.answer.clone(),
                        history: session.history.clone(),
                    })
                }
                Err(e) => {
                    session.state = SessionState::Failed;
                    error!("failed at step {}: {}", session.step, e);
                    events.emit(Event::failed(e.to_string())).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        s: &mut Session,
        driver: &dyn Driver,
        events: &dyn EventSink,
    ) -> Result<()> {
        let cfg = &self.config.session;
        let prompts = PromptBuilder::new(&self.config.prompt, cfg.history_window);
        let resolver = Resolver::new(
            self.model.as_ref(),
            &prompts,
            cfg.max_attempts,
            self.config.model.temperature,
        );
        let locator = Locator::new(driver, events, cfg.scroll_timeout(), cfg.click_timeout());
        let mut observation: Option<Observation> = None;

        while s.step < cfg.max_steps {
            s.state = SessionState::Observing;
            if s.step > 0 {
                let obs =
                    observe::capture(driver, self.artifacts.as_ref(), &s.job_id, s.step).await?;
                events.emit(Event::image(obs.thumbnail(cfg.thumbnail)?)).await;
                s.absorb(&obs);
                observation = Some(obs);
            }

            s.state = SessionState::Resolving;
            let image = observation
                .as_ref()
                .filter(|_| self.config.model.send_screenshot)
                .map(|o| o.png.as_slice());
            let request = ResolveRequest {
                goal: &s.goal,
                url: &s.url,
                dom: &s.dom_links,
                use_buttons: s.use_buttons,
                image,
            };
            let resolved = resolver.resolve(&request, &mut s.history).await?;
            info!("step {}: {}", s.step, resolved.action);
            events.emit(Event::text(resolved.raw.clone())).await;

            s.state = SessionState::Executing;
            let navigates = resolved.action.is_navigation();
            match resolved.action {
                Action::Navigate { url } => {
                    self.apply_cookies(driver, &url).await;
                    tolerate(driver.goto(&url).await)?;
                }
                Action::ClickButton { label, .. } => {
                    let shot = observation.as_ref().map(|o| &o.image);
                    match locator.click(&label, shot).await {
                        Ok(role) => debug!("clicked '{}' as {}", label, role),
                        Err(failure) => {
                            warn!("{}", failure);
                            if let Some(last) = s.history.last_mut() {
                                last.push_str(CLICK_FAILED_MARKER);
                            }
                            s.use_buttons = false;
                        }
                    }
                }
                Action::GoBack { .. } => tolerate(driver.back().await)?,
                Action::FinalAnswer { text } => {
                    s.answer = Some(text);
                    s.step += 1;
                    return Ok(());
                }
            }

            if navigates {
                s.use_buttons = true;
            }

            s.state = SessionState::Stabilizing;
            self.stabilize(driver).await;
            s.step += 1;
        }

        info!("step budget of {} reached", cfg.max_steps);
        Ok(())
    }

    /// Replay stored cookies for the target host. Failures only log.
    async fn apply_cookies(&self, driver: &dyn Driver, url: &str) {
        let Some(host) = cookies::hostname(url) else {
            return;
        };
        let stored = match self.cookies.get(&host).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                warn!("cookie lookup for {} failed: {}", host, e);
                return;
            }
        };
        let prepared = cookies::prepare_for_injection(&stored);
        if let Err(e) = driver.add_cookies(&prepared).await {
            warn!("could not apply cookies for {}: {}", host, e);
        }
    }

    /// Wait for network idle and then load. Both waits are soft.
    async fn stabilize(&self, driver: &dyn Driver) {
        let cfg = &self.config.session;
        for (state, timeout) in [
            (LoadState::NetworkIdle, cfg.network_idle_timeout()),
            (LoadState::Load, cfg.load_timeout()),
        ] {
            if let Err(e) = driver.wait_for_load_state(state, timeout).await {
                debug!("proceeding without {}: {}", state, e);
            }
        }
    }
}
