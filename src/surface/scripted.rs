//! Scripted surface driver.
//!
//! A deterministic, in-memory stand-in for the real browser: selectors
//! resolve from a configurable set, every interaction is recorded, and
//! navigation/close events can be injected from test or paper-run code.
//! No external process is involved.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{OpenedSurface, Surface, SurfaceError, SurfaceEvent, SurfaceFactory};
use crate::config::SelectorConfig;

const EVENT_BUFFER: usize = 32;

// ---------------------------------------------------------------------------
// Recorded actions
// ---------------------------------------------------------------------------

/// Everything a scripted surface was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedAction {
    Goto(String),
    Click(String),
    Fill { selector: String, text: String },
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// An in-memory surface with a scripted DOM.
pub struct ScriptedSurface {
    owner_id: String,
    /// Selectors that resolve; everything else is "not on the page".
    known_selectors: Mutex<HashSet<String>>,
    actions: Mutex<Vec<ScriptedAction>>,
    fail_interactions: AtomicBool,
    closed: AtomicBool,
    /// Artificial delay per interaction, for overlap tests.
    latency: Mutex<Duration>,
    events: mpsc::Sender<SurfaceEvent>,
}

impl ScriptedSurface {
    fn new(owner_id: &str, selectors: &[String], events: mpsc::Sender<SurfaceEvent>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            known_selectors: Mutex::new(selectors.iter().cloned().collect()),
            actions: Mutex::new(Vec::new()),
            fail_interactions: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            events,
        }
    }

    /// Make a selector resolvable from now on.
    pub fn add_selector(&self, selector: &str) {
        self.known_selectors
            .lock()
            .unwrap()
            .insert(selector.to_string());
    }

    /// Remove a selector — simulates venue UI drift.
    pub fn remove_selector(&self, selector: &str) {
        self.known_selectors.lock().unwrap().remove(selector);
    }

    /// Force every subsequent interaction to fail.
    pub fn set_fail_interactions(&self, fail: bool) {
        self.fail_interactions.store(fail, Ordering::SeqCst);
    }

    /// Delay each interaction — makes placements observably slow.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn apply_latency(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Inject a navigation observation, as if the user steered the page.
    pub fn navigate_externally(&self, url: &str) {
        let _ = self.events.try_send(SurfaceEvent::Navigated(url.to_string()));
    }

    /// Inject an unexpected termination (venue-side logout, tab closed).
    pub fn simulate_disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.events.try_send(SurfaceEvent::Closed);
    }

    /// Recorded interactions so far.
    pub fn actions(&self) -> Vec<ScriptedAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_usable(&self, selector: &str) -> Result<(), SurfaceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SurfaceError::Closed);
        }
        if self.fail_interactions.load(Ordering::SeqCst) {
            return Err(SurfaceError::Interaction {
                selector: selector.to_string(),
                message: "interaction failure injected".to_string(),
            });
        }
        if !self.known_selectors.lock().unwrap().contains(selector) {
            return Err(SurfaceError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Surface for ScriptedSurface {
    async fn goto(&self, url: &str) -> Result<(), SurfaceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SurfaceError::Closed);
        }
        self.actions
            .lock()
            .unwrap()
            .push(ScriptedAction::Goto(url.to_string()));
        // A real page would report the navigation through the observer.
        let _ = self.events.try_send(SurfaceEvent::Navigated(url.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), SurfaceError> {
        self.apply_latency().await;
        self.check_usable(selector)?;
        self.actions
            .lock()
            .unwrap()
            .push(ScriptedAction::Click(selector.to_string()));
        Ok(())
    }

    async fn fill(
        &self,
        selector: &str,
        text: &str,
        _timeout: Duration,
    ) -> Result<(), SurfaceError> {
        self.apply_latency().await;
        self.check_usable(selector)?;
        self.actions.lock().unwrap().push(ScriptedAction::Fill {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn close(&self) {
        debug!(owner_id = %self.owner_id, "Scripted surface closed");
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Mints scripted surfaces. Keeps a handle per owner so tests and paper
/// runs can steer the fake DOM after the pool has taken ownership.
pub struct ScriptedFactory {
    selectors: Vec<String>,
    fail_open: AtomicBool,
    handles: Mutex<HashMap<String, Arc<ScriptedSurface>>>,
}

impl ScriptedFactory {
    /// A factory whose surfaces carry the default venue selectors, so the
    /// standard placement protocol resolves on the first strategy.
    pub fn new() -> Self {
        let defaults = SelectorConfig::default();
        let mut selectors = Vec::new();
        selectors.extend(defaults.amount);
        selectors.extend(defaults.call);
        selectors.extend(defaults.put);
        Self::with_selectors(selectors)
    }

    /// A factory whose surfaces resolve exactly the given selectors.
    pub fn with_selectors(selectors: Vec<String>) -> Self {
        Self {
            selectors,
            fail_open: AtomicBool::new(false),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Make subsequent `open` calls fail — simulates resource exhaustion.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// The scripted surface currently minted for an owner, if any.
    pub fn surface_for(&self, owner_id: &str) -> Option<Arc<ScriptedSurface>> {
        self.handles.lock().unwrap().get(owner_id).cloned()
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SurfaceFactory for ScriptedFactory {
    async fn open(&self, owner_id: &str) -> Result<OpenedSurface, SurfaceError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SurfaceError::Launch("open failure injected".to_string()));
        }
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let surface = Arc::new(ScriptedSurface::new(owner_id, &self.selectors, tx));
        self.handles
            .lock()
            .unwrap()
            .insert(owner_id.to_string(), Arc::clone(&surface));
        Ok(OpenedSurface {
            surface,
            events: rx,
        })
    }

    async fn shutdown(&self) {
        for surface in self.handles.lock().unwrap().values() {
            surface.closed.store(true, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
