//! Browser abstraction used by the session loop.
//!
//! [`EokaDriver`] is the production implementation. Tests drive the loop
//! through an in-memory fake.

mod page;

pub use page::EokaDriver;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::cookies::CookieRecord;
use crate::Result;

/// Accessible role used to resolve a text label to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Button,
    Link,
}

impl Role {
    /// Locator strategies in the order they are tried.
    pub const CANDIDATES: [Role; 2] = [Role::Button, Role::Link];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Button => "button",
            Role::Link => "link",
        })
    }
}

/// Handle to an element found on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// CSS selector that uniquely addresses the element.
    pub selector: String,
}

/// Element bounds in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NetworkIdle,
    Load,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadState::NetworkIdle => "networkidle",
            LoadState::Load => "load",
        })
    }
}

/// One page in one browser context.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;
    async fn back(&self) -> Result<()>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;
    /// Full rendered DOM as HTML.
    async fn content(&self) -> Result<String>;
    async fn url(&self) -> Result<String>;
    async fn viewport(&self) -> Result<Viewport>;

    /// First element with `role` whose accessible name contains `name`.
    async fn find_by_role(&self, role: Role, name: &str) -> Result<Option<ElementHandle>>;
    async fn is_visible(&self, element: &ElementHandle) -> Result<bool>;
    /// Scroll the element into view and report whether it became visible
    /// before `timeout`.
    async fn scroll_into_view(&self, element: &ElementHandle, timeout: Duration) -> Result<bool>;
    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<Rect>>;
    async fn click(&self, element: &ElementHandle, timeout: Duration) -> Result<()>;

    async fn add_cookies(&self, cookies: &[CookieRecord]) -> Result<()>;
    /// Errors with [`crate::Error::Timeout`] if the state is not reached.
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;
}
