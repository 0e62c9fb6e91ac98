//! Resolve a text label to an element and click it.
//!
//! Candidates are tried by role, button first and then link, taking the
//! first match for each. Before each click the element's region of the last
//! screenshot is emitted as an image event.

use image::{DynamicImage, GenericImageView};
use std::time::Duration;
use tracing::{debug, warn};

use crate::driver::{Driver, ElementHandle, Rect, Role, Viewport};
use crate::events::{Event, EventSink};
use crate::observe::image_to_base64;

/// No candidate could be clicked.
#[derive(Debug, thiserror::Error)]
#[error("no clickable element for '{label}' ({})", .reasons.join("; "))]
pub struct ClickFailure {
    pub label: String,
    /// Why each role candidate was rejected.
    pub reasons: Vec<String>,
}

/// Pixel region of a screenshot, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropRegion {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Map a viewport-space box onto a screenshot of `shot` pixels.
///
/// Returns `None` when the scaled box lies entirely outside the image.
pub fn crop_region(rect: Rect, viewport: Viewport, shot: (u32, u32)) -> Option<CropRegion> {
    if viewport.width == 0 || viewport.height == 0 {
        return None;
    }
    let sx = shot.0 as f64 / viewport.width as f64;
    let sy = shot.1 as f64 / viewport.height as f64;

    let clamp = |v: f64, max: u32| v.round().clamp(0.0, max as f64) as u32;
    let region = CropRegion {
        left: clamp(rect.x * sx, shot.0),
        top: clamp(rect.y * sy, shot.1),
        right: clamp((rect.x + rect.width) * sx, shot.0),
        bottom: clamp((rect.y + rect.height) * sy, shot.1),
    };
    (region.right > region.left && region.bottom > region.top).then_some(region)
}

pub struct Locator<'a> {
    driver: &'a dyn Driver,
    events: &'a dyn EventSink,
    scroll_timeout: Duration,
    click_timeout: Duration,
}

impl<'a> Locator<'a> {
    pub fn new(
        driver: &'a dyn Driver,
        events: &'a dyn EventSink,
        scroll_timeout: Duration,
        click_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            events,
            scroll_timeout,
            click_timeout,
        }
    }

    /// Click the first element matching `label`, returning the role that
    /// worked.
    pub async fn click(
        &self,
        label: &str,
        screenshot: Option<&DynamicImage>,
    ) -> Result<Role, ClickFailure> {
        let mut reasons = Vec::new();
        for role in Role::CANDIDATES {
            match self.try_role(role, label, screenshot).await {
                Ok(()) => {
                    debug!("clicked {} '{}'", role, label);
                    return Ok(role);
                }
                Err(reason) => {
                    debug!("{} candidate for '{}' rejected: {}", role, label, reason);
                    reasons.push(format!("{}: {}", role, reason));
                }
            }
        }
        Err(ClickFailure {
            label: label.to_string(),
            reasons,
        })
    }

    async fn try_role(
        &self,
        role: Role,
        label: &str,
        screenshot: Option<&DynamicImage>,
    ) -> std::result::Result<(), String> {
        let element = self
            .driver
            .find_by_role(role, label)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "not found".to_string())?;

        let visible = self
            .driver
            .is_visible(&element)
            .await
            .map_err(|e| e.to_string())?;
        if !visible {
            let scrolled = self
                .driver
                .scroll_into_view(&element, self.scroll_timeout)
                .await
                .map_err(|e| e.to_string())?;
            if !scrolled {
                return Err("not visible".into());
            }
        }

        if let Some(shot) = screenshot {
            self.emit_crop(&element, shot).await;
        }

        self.driver
            .click(&element, self.click_timeout)
            .await
            .map_err(|e| e.to_string())
    }

    async fn emit_crop(&self, element: &ElementHandle, shot: &DynamicImage) {
        let (rect, viewport) = match (
            self.driver.bounding_box(element).await,
            self.driver.viewport().await,
        ) {
            (Ok(Some(rect)), Ok(viewport)) => (rect, viewport),
            (Ok(None), _) => return,
            (Err(e), _) | (_, Err(e)) => {
                warn!("could not measure {}: {}", element.selector, e);
                return;
            }
        };

        let Some(region) = crop_region(rect, viewport, shot.dimensions()) else {
            debug!("{} lies outside the screenshot", element.selector);
            return;
        };
        let cropped = shot.crop_imm(region.left, region.top, region.width(), region.height());
        match image_to_base64(&cropped) {
            Ok(encoded) => self.events.emit(Event::image(encoded)).await,
            Err(e) => warn!("failed to encode crop: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieRecord;
    use crate::driver::LoadState;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::sync::{Arc, Mutex};

    /// How the element for one role behaves.
    #[derive(Clone, Copy)]
    struct Target {
        visible: bool,
        scrolls: bool,
        clicks: bool,
    }

    const READY: Target = Target {
        visible: true,
        scrolls: true,
        clicks: true,
    };

    /// Driver with at most one element per role. Scrolls, crops and clicks
    /// all land in one shared log so their order can be checked.
    struct ScriptedDriver {
        button: Option<Target>,
        link: Option<Target>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedDriver {
        fn target(&self, element: &ElementHandle) -> Target {
            let target = match element.selector.as_str() {
                "button" => self.button,
                _ => self.link,
            };
            target.unwrap_or(READY)
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        async fn goto(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn back(&self) -> Result<()> {
            Ok(())
        }
        async fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn content(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn url(&self) -> Result<String> {
            Ok("about:blank".into())
        }
        async fn viewport(&self) -> Result<Viewport> {
            Ok(Viewport {
                width: 64,
                height: 36,
            })
        }
        async fn find_by_role(&self, role: Role, _name: &str) -> Result<Option<ElementHandle>> {
            let present = match role {
                Role::Button => self.button.is_some(),
                Role::Link => self.link.is_some(),
            };
            Ok(present.then(|| ElementHandle {
                selector: role.to_string(),
            }))
        }
        async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
            Ok(self.target(element).visible)
        }
        async fn scroll_into_view(&self, element: &ElementHandle, _t: Duration) -> Result<bool> {
            self.record(format!("scroll:{}", element.selector));
            Ok(self.target(element).scrolls)
        }
        async fn bounding_box(&self, _element: &ElementHandle) -> Result<Option<Rect>> {
            Ok(Some(Rect {
                x: 10.0,
                y: 5.0,
                width: 20.0,
                height: 10.0,
            }))
        }
        async fn click(&self, element: &ElementHandle, timeout: Duration) -> Result<()> {
            self.record(format!("click:{}", element.selector));
            if self.target(element).clicks {
                Ok(())
            } else {
                Err(Error::Timeout(format!("click after {:?}", timeout)))
            }
        }
        async fn add_cookies(&self, _cookies: &[CookieRecord]) -> Result<()> {
            Ok(())
        }
        async fn wait_for_load_state(&self, _s: LoadState, _t: Duration) -> Result<()> {
            Ok(())
        }
    }

    struct LogSink {
        log: Arc<Mutex<Vec<String>>>,
        crops: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl EventSink for LogSink {
        async fn emit(&self, event: Event) {
            if let Event::Image { image } = event {
                let bytes = BASE64.decode(image).unwrap();
                let crop = image::load_from_memory(&bytes).unwrap();
                self.crops.lock().unwrap().push(crop.dimensions());
                self.log.lock().unwrap().push("crop".into());
            }
        }
    }

    fn setup(
        button: Option<Target>,
        link: Option<Target>,
    ) -> (ScriptedDriver, LogSink, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let driver = ScriptedDriver {
            button,
            link,
            log: log.clone(),
        };
        let sink = LogSink {
            log: log.clone(),
            crops: Mutex::new(Vec::new()),
        };
        (driver, sink, log)
    }

    fn screenshot() -> DynamicImage {
        DynamicImage::new_rgb8(128, 72)
    }

    fn timeouts() -> (Duration, Duration) {
        (Duration::from_millis(200), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_hidden_button_skipped_for_link() {
        let hidden = Target {
            visible: false,
            scrolls: false,
            clicks: true,
        };
        let (driver, sink, log) = setup(Some(hidden), Some(READY));
        let (scroll, click) = timeouts();
        let locator = Locator::new(&driver, &sink, scroll, click);

        let role = locator.click("Sign in", Some(&screenshot())).await.unwrap();
        assert_eq!(role, Role::Link);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["scroll:button", "crop", "click:link"]
        );
        assert_eq!(*sink.crops.lock().unwrap(), vec![(40, 20)]);
    }

    #[tokio::test]
    async fn test_button_scrolled_into_view_is_clicked() {
        let below = Target {
            visible: false,
            scrolls: true,
            clicks: true,
        };
        let (driver, sink, log) = setup(Some(below), Some(READY));
        let (scroll, click) = timeouts();
        let locator = Locator::new(&driver, &sink, scroll, click);

        let role = locator.click("Sign in", Some(&screenshot())).await.unwrap();
        assert_eq!(role, Role::Button);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["scroll:button", "crop", "click:button"]
        );
    }

    #[tokio::test]
    async fn test_failed_click_falls_through_to_link() {
        let stuck = Target {
            visible: true,
            scrolls: true,
            clicks: false,
        };
        let (driver, sink, log) = setup(Some(stuck), Some(READY));
        let (scroll, click) = timeouts();
        let locator = Locator::new(&driver, &sink, scroll, click);

        let role = locator.click("Sign in", Some(&screenshot())).await.unwrap();
        assert_eq!(role, Role::Link);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["crop", "click:button", "crop", "click:link"]
        );
        assert_eq!(sink.crops.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_every_candidate_rejected() {
        let hidden = Target {
            visible: false,
            scrolls: false,
            clicks: true,
        };
        let (driver, sink, log) = setup(Some(hidden), None);
        let (scroll, click) = timeouts();
        let locator = Locator::new(&driver, &sink, scroll, click);

        let failure = locator.click("Sign in", None).await.unwrap_err();
        assert_eq!(failure.label, "Sign in");
        assert_eq!(
            failure.reasons,
            vec!["button: not visible", "link: not found"]
        );
        assert_eq!(*log.lock().unwrap(), vec!["scroll:button"]);
    }

    #[test]
    fn test_crop_region_scales() {
        let rect = Rect {
            x: 200.0,
            y: 100.0,
            width: 100.0,
            height: 50.0,
        };
        let viewport = Viewport {
            width: 1280,
            height: 720,
        };
        let region = crop_region(rect, viewport, (1920, 1080)).unwrap();
        assert_eq!((region.left, region.top), (300, 150));
        assert_eq!((region.right, region.bottom), (450, 225));
        assert_eq!((region.width(), region.height()), (150, 75));
    }

    #[test]
    fn test_crop_region_identity() {
        let rect = Rect {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
        };
        let viewport = Viewport {
            width: 800,
            height: 600,
        };
        let region = crop_region(rect, viewport, (800, 600)).unwrap();
        assert_eq!(
            region,
            CropRegion {
                left: 10,
                top: 20,
                right: 40,
                bottom: 60
            }
        );
    }

    #[test]
    fn test_crop_region_clamped() {
        let viewport = Viewport {
            width: 100,
            height: 100,
        };
        let partial = Rect {
            x: 90.0,
            y: -10.0,
            width: 30.0,
            height: 30.0,
        };
        let region = crop_region(partial, viewport, (100, 100)).unwrap();
        assert_eq!(
            region,
            CropRegion {
                left: 90,
                top: 0,
                right: 100,
                bottom: 20
            }
        );

        let outside = Rect {
            x: 150.0,
            y: 10.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(crop_region(outside, viewport, (100, 100)).is_none());
        let zero = Viewport {
            width: 0,
            height: 0,
        };
        assert!(crop_region(partial, zero, (100, 100)).is_none());
    }

    #[test]
    fn test_failure_message() {
        let failure = ClickFailure {
            label: "Login".into(),
            reasons: vec!["button: not found".into(), "link: not visible".into()],
        };
        assert_eq!(
            failure.to_string(),
            "no clickable element for 'Login' (button: not found; link: not visible)"
        );
    }
}
