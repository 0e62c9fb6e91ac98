use async_trait::async_trait;
use eoka::{Browser, Page};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Driver, ElementHandle, LoadState, Rect, Role, Viewport};
use crate::config::BrowserConfig;
use crate::cookies::CookieRecord;
use crate::{Error, Result};

/// Attribute used to tag elements found by [`Driver::find_by_role`].
const HANDLE_ATTR: &str = "data-browserman-id";

/// Quiet period required before the network counts as idle.
const NETWORK_IDLE_MS: u64 = 500;

const POLL_MS: u64 = 100;

/// [`Driver`] backed by a single eoka page.
pub struct EokaDriver {
    page: Page,
}

impl EokaDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// Launch a browser and open a blank page in it.
    ///
    /// The caller owns the returned [`Browser`] and must close it when the
    /// session ends.
    pub async fn launch(config: &BrowserConfig) -> Result<(Browser, Self)> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.width,
            viewport_height: config.viewport.height,
            ..Default::default()
        };

        debug!(
            "launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;
        Ok((browser, Self::new(page)))
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Evaluate a JS expression that returns `JSON.stringify(...)` and decode it.
    async fn eval_json<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T> {
        let json_str: String = self.page.evaluate(js).await?;
        serde_json::from_str(&json_str)
            .map_err(|e| Error::Browser(format!("bad page result: {} (got: {})", e, json_str)))
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn role_selector(role: Role) -> &'static str {
    match role {
        Role::Button => {
            "button, input[type=button], input[type=submit], input[type=reset], [role=button]"
        }
        Role::Link => "a[href], [role=link]",
    }
}

fn find_js(role: Role, name: &str) -> String {
    format!(
        r#"(() => {{
    const needle = {name}.toLowerCase();
    const label = el => (el.getAttribute('aria-label') || el.innerText || el.value || el.title || '').trim();
    for (const el of document.querySelectorAll({sel})) {{
        if (!label(el).toLowerCase().includes(needle)) continue;
        let id = el.getAttribute({attr});
        if (!id) {{
            window.__browsermanSeq = (window.__browsermanSeq || 0) + 1;
            id = String(window.__browsermanSeq);
            el.setAttribute({attr}, id);
        }}
        return id;
    }}
    return '';
}})()"#,
        name = quote(name),
        sel = quote(role_selector(role)),
        attr = quote(HANDLE_ATTR),
    )
}

fn visible_js(selector: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({});
    if (!el || !el.isConnected) return false;
    const s = getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0 && r.bottom > 0 && r.right > 0
        && r.top < window.innerHeight && r.left < window.innerWidth;
}})()"#,
        quote(selector)
    )
}

#[async_trait]
impl Driver for EokaDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn back(&self) -> Result<()> {
        self.page.back().await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn content(&self) -> Result<String> {
        Ok(self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await?)
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn viewport(&self) -> Result<Viewport> {
        self.eval_json("JSON.stringify({width: window.innerWidth, height: window.innerHeight})")
            .await
    }

    async fn find_by_role(&self, role: Role, name: &str) -> Result<Option<ElementHandle>> {
        let id: String = self.page.evaluate(&find_js(role, name)).await?;
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(ElementHandle {
            selector: format!("[{}=\"{}\"]", HANDLE_ATTR, id),
        }))
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.page.evaluate(&visible_js(&element.selector)).await?)
    }

    async fn scroll_into_view(&self, element: &ElementHandle, timeout: Duration) -> Result<bool> {
        let js = format!(
            "document.querySelector({})?.scrollIntoView({{block:'center', inline:'center'}})",
            quote(&element.selector)
        );
        self.page.execute(&js).await?;

        let start = Instant::now();
        loop {
            if self.is_visible(element).await? {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            self.page.wait(POLL_MS).await;
        }
    }

    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<Rect>> {
        let js = format!(
            r#"(() => {{
    const el = document.querySelector({});
    if (!el) return 'null';
    const r = el.getBoundingClientRect();
    return JSON.stringify({{x: r.x, y: r.y, width: r.width, height: r.height}});
}})()"#,
            quote(&element.selector)
        );
        self.eval_json(&js).await
    }

    async fn click(&self, element: &ElementHandle, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.click(&element.selector)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(format!(
                "click on {} after {}ms",
                element.selector,
                timeout.as_millis()
            ))),
        }
    }

    async fn add_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        for cookie in cookies {
            self.page
                .set_cookie(
                    &cookie.name,
                    &cookie.value,
                    cookie.domain.as_deref(),
                    cookie.path.as_deref(),
                )
                .await?;
        }
        debug!("applied {} cookies", cookies.len());
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let timeout_ms = timeout.as_millis() as u64;
        match state {
            LoadState::NetworkIdle => self
                .page
                .wait_for_network_idle(NETWORK_IDLE_MS, timeout_ms)
                .await
                .map_err(|e| Error::Timeout(format!("{}: {}", state, e))),
            LoadState::Load => {
                let start = Instant::now();
                loop {
                    let ready: bool = self
                        .page
                        .evaluate("document.readyState === 'complete'")
                        .await?;
                    if ready {
                        return Ok(());
                    }
                    if start.elapsed() >= timeout {
                        return Err(Error::Timeout(format!("{} after {}ms", state, timeout_ms)));
                    }
                    self.page.wait(POLL_MS).await;
                }
            }
        }
    }
}
