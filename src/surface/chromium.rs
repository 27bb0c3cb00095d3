//! Chromium surface driver.
//!
//! Drives the venue through the Chrome DevTools Protocol. One browser
//! process is shared by every user — launching Chromium is the expensive
//! part — while each user gets an isolated browser context (separate
//! cookies and storage) with a single page, so login states never bleed
//! between users.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{OpenedSurface, Surface, SurfaceError, SurfaceEvent};
use crate::config::PoolConfig;

/// Buffer for per-surface observation events.
const EVENT_BUFFER: usize = 32;

/// Poll cadence while waiting for a selector to appear.
const LOCATOR_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

struct SharedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// Mints per-user Chromium surfaces on a lazily launched shared process.
pub struct ChromiumFactory {
    headless: bool,
    args: Vec<String>,
    shared: Arc<Mutex<Option<SharedBrowser>>>,
}

impl ChromiumFactory {
    pub fn new(pool: &PoolConfig) -> Self {
        Self {
            headless: pool.headless,
            args: pool.browser_args.clone(),
            shared: Arc::new(Mutex::new(None)),
        }
    }

    async fn launch(&self) -> Result<SharedBrowser, SurfaceError> {
        let mut builder = BrowserConfig::builder();
        if !self.headless {
            builder = builder.with_head();
        }
        for arg in &self.args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder.build().map_err(SurfaceError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SurfaceError::Launch(e.to_string()))?;

        // The handler must be polled for the lifetime of the connection.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(SharedBrowser {
            browser,
            handler_task,
        })
    }
}

#[async_trait]
impl super::SurfaceFactory for ChromiumFactory {
    async fn open(&self, owner_id: &str) -> Result<OpenedSurface, SurfaceError> {
        let mut guard = self.shared.lock().await;
        if guard.is_none() {
            info!("Launching shared browser process");
            *guard = Some(self.launch().await?);
        }
        let Some(shared) = guard.as_ref() else {
            return Err(SurfaceError::Launch("shared browser unavailable".to_string()));
        };

        // Isolated context per user: separate cookies, storage, login state.
        let context_id: BrowserContextId = shared
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| SurfaceError::Launch(e.to_string()))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(SurfaceError::Launch)?;

        let page = shared
            .browser
            .new_page(target)
            .await
            .map_err(|e| SurfaceError::Launch(e.to_string()))?;

        let events = spawn_observer(&page).await?;
        drop(guard);

        debug!(owner_id, "Chromium surface opened");

        Ok(OpenedSurface {
            surface: Arc::new(ChromiumSurface {
                page,
                context_id,
                shared: Arc::clone(&self.shared),
            }),
            events,
        })
    }

    async fn shutdown(&self) {
        let mut guard = self.shared.lock().await;
        if let Some(mut shared) = guard.take() {
            info!("Shutting down shared browser process");
            if let Err(e) = shared.browser.close().await {
                warn!(error = %e, "Browser close reported an error");
            }
            shared.handler_task.abort();
        }
    }
}

/// Forward main-frame navigations to the owner; signal `Closed` when the
/// event stream ends (tab closed, context disposed, or process death).
async fn spawn_observer(
    page: &Page,
) -> Result<mpsc::Receiver<SurfaceEvent>, SurfaceError> {
    let mut navigations = page
        .event_listener::<EventFrameNavigated>()
        .await
        .map_err(|e| SurfaceError::Launch(e.to_string()))?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        while let Some(event) = navigations.next().await {
            if event.frame.parent_id.is_none()
                && tx
                    .send(SurfaceEvent::Navigated(event.frame.url.clone()))
                    .await
                    .is_err()
            {
                return;
            }
        }
        let _ = tx.send(SurfaceEvent::Closed).await;
    });

    Ok(rx)
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// One user's isolated context + page on the shared browser.
pub struct ChromiumSurface {
    page: Page,
    context_id: BrowserContextId,
    shared: Arc<Mutex<Option<SharedBrowser>>>,
}

impl ChromiumSurface {
    /// Wait for a selector to resolve within the attempt budget.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<Element, SurfaceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(LOCATOR_POLL).await;
                }
                Err(_) => return Err(SurfaceError::ElementNotFound(selector.to_string())),
            }
        }
    }

    fn interaction(selector: &str, e: impl std::fmt::Display) -> SurfaceError {
        SurfaceError::Interaction {
            selector: selector.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl Surface for ChromiumSurface {
    async fn goto(&self, url: &str) -> Result<(), SurfaceError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| SurfaceError::Navigation(e.to_string()))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), SurfaceError> {
        let element = self.wait_for(selector, timeout).await?;
        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| Self::interaction(selector, e))
    }

    async fn fill(
        &self,
        selector: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<(), SurfaceError> {
        let element = self.wait_for(selector, timeout).await?;
        element
            .click()
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .press_key("Enter")
            .await
            .map(|_| ())
            .map_err(|e| Self::interaction(selector, e))
    }

    async fn close(&self) {
        // Dispose only this user's context. The shared process stays up.
        let guard = self.shared.lock().await;
        if let Some(shared) = guard.as_ref() {
            match DisposeBrowserContextParams::builder()
                .browser_context_id(self.context_id.clone())
                .build()
            {
                Ok(params) => {
                    if let Err(e) = shared.browser.execute(params).await {
                        debug!(error = %e, "Context dispose failed (already gone?)");
                    }
                }
                Err(e) => debug!(error = %e, "Context dispose params rejected"),
            }
        }
    }
}
