//! Automated surface sessions.
//!
//! Defines the `Surface` and `SurfaceFactory` traits and provides
//! implementations for:
//! - Chromium (CDP via chromiumoxide) — one shared browser process, one
//!   isolated context per user
//! - Scripted — deterministic in-memory surface for tests and paper runs
//!
//! A surface stands in for one user's manual interaction with the venue.
//! The action set is deliberately small and fixed: navigate, click a
//! locator, fill-and-commit a field, close. Anything richer belongs to a
//! general-purpose automation tool, which this is not.

pub mod chromium;
pub mod scripted;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use chromium::ChromiumFactory;
pub use scripted::{ScriptedFactory, ScriptedSurface};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Observations pushed from a surface to its owner.
///
/// Location tracking is event-driven — the pool never polls the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The main frame navigated to a new URL.
    Navigated(String),
    /// The surface is gone: tab closed, venue-side logout, process death.
    Closed,
}

/// A freshly opened surface together with its observation stream.
pub struct OpenedSurface {
    pub surface: Arc<dyn Surface>,
    pub events: mpsc::Receiver<SurfaceEvent>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One user's isolated browsing context on the venue.
///
/// Per-call timeouts bound each locator attempt; a selector that does not
/// resolve within the budget fails that single strategy, and the caller
/// moves on to the next one in its fallback list.
#[async_trait]
pub trait Surface: Send + Sync {
    /// Navigate the page to the given URL.
    async fn goto(&self, url: &str) -> Result<(), SurfaceError>;

    /// Locate an element and click it.
    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), SurfaceError>;

    /// Locate a field, focus it, clear it, type `text`, and commit.
    async fn fill(&self, selector: &str, text: &str, timeout: Duration)
        -> Result<(), SurfaceError>;

    /// Tear down this surface's context. Never touches the shared process.
    async fn close(&self);
}

/// Owns the shared underlying process and mints per-user surfaces.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    /// Open an isolated surface for `owner_id`. Lazily starts the shared
    /// process on first call. Failure is a hard error to the caller.
    async fn open(&self, owner_id: &str) -> Result<OpenedSurface, SurfaceError>;

    /// Tear down the shared process. Individual surfaces must already be
    /// closed (or will die with it).
    async fn shutdown(&self);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Faults raised by a surface driver.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("No element matched selector: {0}")]
    ElementNotFound(String),

    #[error("Interaction with {selector} failed: {message}")]
    Interaction { selector: String, message: String },

    #[error("Surface is closed")]
    Closed,
}
