use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use axum::response::sse::{Event, KeepAlive};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::debug;

/// Marks cached renderings under a dashboard path as stale.
///
/// Calls are fire-and-forget; implementations must not block on readers.
pub trait ViewInvalidator: Send + Sync {
    fn revalidate_path(&self, path: &str);
}

/// Notification emitted each time a path is invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revalidation {
    pub ts: DateTime<Utc>,
    pub path: String,
    pub generation: u64,
}

impl Revalidation {
    pub fn into_sse_event(self) -> Result<Event, serde_json::Error> {
        let data = serde_json::to_string(&self)?;
        Ok(Event::default()
            .event("revalidate")
            .id(self.generation.to_string())
            .data(data))
    }
}

/// In-process invalidation hub: a generation counter per path plus a
/// broadcast channel that renderers subscribe to.
#[derive(Clone)]
pub struct RevalidationHub {
    sender: broadcast::Sender<Revalidation>,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl RevalidationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(128);
        Self {
            sender,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Revalidation> {
        self.sender.subscribe()
    }

    /// Current generation of `path`; zero when it was never invalidated.
    pub fn generation(&self, path: &str) -> u64 {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn bump(&self, path: &str) -> u64 {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let generation = generations.entry(path.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }
}

impl Default for RevalidationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewInvalidator for RevalidationHub {
    fn revalidate_path(&self, path: &str) {
        let generation = self.bump(path);
        counter!("view_revalidations_total", "path" => path.to_string()).increment(1);

        let event = Revalidation {
            ts: Utc::now(),
            path: path.to_string(),
            generation,
        };
        if self.sender.send(event).is_err() {
            debug!(stage = "revalidate", path, generation, "no revalidation subscribers");
        }
    }
}

/// Restricts a revalidation stream to paths under a prefix.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    prefix: Option<String>,
}

impl PathFilter {
    pub fn from_prefix(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|value| !value.is_empty()),
        }
    }

    pub fn matches(&self, event: &Revalidation) -> bool {
        match &self.prefix {
            Some(prefix) => event.path.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

pub fn revalidation_stream(
    hub: RevalidationHub,
    filter: PathFilter,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    BroadcastStream::new(hub.subscribe()).filter_map(move |result| match result {
        Ok(event) if filter.matches(&event) => Some(event.into_sse_event()),
        Ok(_) => None,
        Err(_) => None,
    })
}

pub fn revalidation_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}
