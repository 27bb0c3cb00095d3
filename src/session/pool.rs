//! Session pool manager.
//!
//! Owns the session arena: one entry per user, each holding the handle to
//! an isolated surface on the shared browser process. All access goes
//! through this instance — there is no ambient session registry.
//!
//! Location and activity tracking are purely event-driven: a watcher task
//! per session consumes the surface's navigation observations. When the
//! observation stream ends (venue-side logout, tab closed, process death),
//! the watcher removes the entry and emits `session_closed` — the pool
//! itself never polls and never crashes on a lost surface.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::VenueConfig;
use crate::notify::{EventSink, Notification};
use crate::surface::{Surface, SurfaceEvent, SurfaceFactory};
use crate::types::{EngineError, LocationState};

// ---------------------------------------------------------------------------
// Arena entries
// ---------------------------------------------------------------------------

struct SessionEntry {
    surface: Arc<dyn Surface>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    /// Latest URL reported by the navigation observer.
    current_url: Option<String>,
    alive: bool,
    watcher: JoinHandle<()>,
}

/// Read-only snapshot of one session, safe to hand out.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub location: LocationState,
    pub alive: bool,
}

/// Aggregate pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub alive: usize,
    pub on_tradable_page: usize,
    pub cap: usize,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} sessions ({} alive, {} on trading page)",
            self.total, self.cap, self.alive, self.on_tradable_page,
        )
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Creates, tracks, and destroys per-user surface sessions, enforcing the
/// concurrency cap. The orchestrator only ever borrows handles per call.
pub struct SessionPool {
    factory: Arc<dyn SurfaceFactory>,
    venue: VenueConfig,
    cap: usize,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    events: Arc<dyn EventSink>,
}

impl SessionPool {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        venue: VenueConfig,
        cap: usize,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            factory,
            venue,
            cap,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Open a surface session for a user.
    ///
    /// Fails with `CapacityExceeded` at the cap, without touching the
    /// count. The shared browser process starts lazily on the first call.
    /// A user reconnecting while already holding a session gets a fresh
    /// one: the old session is closed first so the cap stays meaningful.
    pub async fn create_session(&self, owner_id: &str) -> Result<SessionView, EngineError> {
        let previous = self.sessions.lock().unwrap().remove(owner_id);
        if let Some(entry) = previous {
            info!(owner_id, "Replacing existing session");
            entry.watcher.abort();
            entry.surface.close().await;
            self.events.emit(owner_id, Notification::SessionClosed);
        }

        if self.sessions.lock().unwrap().len() >= self.cap {
            return Err(EngineError::CapacityExceeded { cap: self.cap });
        }

        let opened = self.factory.open(owner_id).await?;
        let watcher = tokio::spawn(watch_session(
            Arc::clone(&self.sessions),
            owner_id.to_string(),
            Arc::downgrade(&opened.surface),
            opened.events,
            Arc::clone(&self.events),
        ));

        let now = Utc::now();
        let entry = SessionEntry {
            surface: opened.surface,
            created_at: now,
            last_activity: now,
            current_url: None,
            alive: true,
            watcher,
        };

        {
            let mut map = self.sessions.lock().unwrap();
            if map.len() >= self.cap {
                // Lost the race to a concurrent create while opening.
                drop(map);
                entry.watcher.abort();
                entry.surface.close().await;
                return Err(EngineError::CapacityExceeded { cap: self.cap });
            }
            map.insert(owner_id.to_string(), entry);
        }

        info!(owner_id, "Session created");
        self.events.emit(owner_id, Notification::SessionCreated);

        Ok(SessionView {
            owner_id: owner_id.to_string(),
            created_at: now,
            last_activity: now,
            location: LocationState::OffTarget,
            alive: true,
        })
    }

    /// Navigate a user's surface to the venue login entry point.
    pub async fn navigate_to_entry(&self, owner_id: &str) -> Result<(), EngineError> {
        let surface = self
            .get_handle(owner_id)
            .ok_or_else(|| EngineError::SessionNotFound(owner_id.to_string()))?;
        surface
            .goto(&self.venue.login_url)
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(owner_id) {
            entry.last_activity = Utc::now();
        }
        Ok(())
    }

    /// Whether the user's page is currently tradable. Recomputed from the
    /// latest observed URL on every call, never cached.
    pub fn is_on_tradable_page(&self, owner_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(owner_id)
            .and_then(|e| e.current_url.as_deref())
            .map(|url| self.venue.is_tradable_url(url))
            .unwrap_or(false)
    }

    /// Demo/real/off-target classification of the user's observed location.
    pub fn location_state(&self, owner_id: &str) -> Option<LocationState> {
        self.sessions.lock().unwrap().get(owner_id).map(|e| {
            e.current_url
                .as_deref()
                .map(|url| self.venue.location_of(url))
                .unwrap_or(LocationState::OffTarget)
        })
    }

    /// Borrow the surface handle for a user, if a session exists.
    pub fn get_handle(&self, owner_id: &str) -> Option<Arc<dyn Surface>> {
        self.sessions
            .lock()
            .unwrap()
            .get(owner_id)
            .map(|e| Arc::clone(&e.surface))
    }

    /// Snapshot of one session.
    pub fn session(&self, owner_id: &str) -> Option<SessionView> {
        self.sessions.lock().unwrap().get(owner_id).map(|e| SessionView {
            owner_id: owner_id.to_string(),
            created_at: e.created_at,
            last_activity: e.last_activity,
            location: e
                .current_url
                .as_deref()
                .map(|url| self.venue.location_of(url))
                .unwrap_or(LocationState::OffTarget),
            alive: e.alive,
        })
    }

    /// Owners of every live session, in no particular order.
    pub fn live_owners(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.alive)
            .map(|(owner, _)| owner.clone())
            .collect()
    }

    /// Close one user's session. Idempotent; only the per-user context is
    /// torn down, never the shared process.
    pub async fn close_session(&self, owner_id: &str) {
        let entry = self.sessions.lock().unwrap().remove(owner_id);
        let Some(entry) = entry else {
            return;
        };
        entry.watcher.abort();
        entry.surface.close().await;
        info!(owner_id, "Session closed");
        self.events.emit(owner_id, Notification::SessionClosed);
    }

    /// Close every session, then the shared process. Safe with zero
    /// sessions.
    pub async fn close_all(&self) {
        let owners: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        info!(count = owners.len(), "Closing all sessions");
        let closes = owners.iter().map(|owner| self.close_session(owner));
        futures::future::join_all(closes).await;
        self.factory.shutdown().await;
    }

    pub fn stats(&self) -> PoolStats {
        let map = self.sessions.lock().unwrap();
        let alive = map.values().filter(|e| e.alive).count();
        let on_tradable_page = map
            .values()
            .filter(|e| {
                e.current_url
                    .as_deref()
                    .map(|url| self.venue.is_tradable_url(url))
                    .unwrap_or(false)
            })
            .count();
        PoolStats {
            total: map.len(),
            alive,
            on_tradable_page,
            cap: self.cap,
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Consume one surface's observation stream, keeping its arena entry
/// current. When the stream ends, remove the entry — but only if it still
/// belongs to the watched surface, since a reconnect may have replaced it.
async fn watch_session(
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    owner_id: String,
    watched: Weak<dyn Surface>,
    mut events: mpsc::Receiver<SurfaceEvent>,
    sink: Arc<dyn EventSink>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SurfaceEvent::Navigated(url) => {
                let mut map = sessions.lock().unwrap();
                if let Some(entry) = map.get_mut(&owner_id) {
                    entry.last_activity = Utc::now();
                    entry.current_url = Some(url);
                }
            }
            SurfaceEvent::Closed => break,
        }
    }

    let removed = {
        let mut map = sessions.lock().unwrap();
        let is_ours = map
            .get(&owner_id)
            .map(|entry| {
                watched
                    .upgrade()
                    .map(|s| Arc::ptr_eq(&s, &entry.surface))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        is_ours && map.remove(&owner_id).is_some()
    };

    if removed {
        warn!(%owner_id, "Surface lost — session cleaned up");
        sink.emit(&owner_id, Notification::SessionClosed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
