//! Scripted in-process source clients for pipeline tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scopus_resolver_core::input::SearchMode;
use scopus_resolver_core::source::{SourceClient, SourceError, SourceHit, SourceKind};

/// One canned answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Primary-style hit with a Scopus identifier.
    Id(&'static str),
    /// Metadata-only hit (title plus DOI).
    Meta {
        title: &'static str,
        doi: &'static str,
    },
    NotFound,
    RateLimited,
    Unauthorized,
    Transient,
}

impl Reply {
    fn into_response(self, name: &str) -> Result<SourceHit, SourceError> {
        match self {
            Self::Id(id) => Ok(SourceHit {
                title: Some(format!("Title for {id}")),
                resolved_id: Some(id.to_string()),
                doi: None,
                http_status: 200,
            }),
            Self::Meta { title, doi } => Ok(SourceHit {
                title: Some(title.to_string()),
                resolved_id: None,
                doi: Some(doi.to_string()),
                http_status: 200,
            }),
            Self::NotFound => Err(SourceError::not_found(name)),
            Self::RateLimited => Err(SourceError::rate_limited(name, None)),
            Self::Unauthorized => Err(SourceError::unauthorized(name, 401)),
            Self::Transient => Err(SourceError::transient(name, "connection reset")),
        }
    }
}

/// A source whose answers are scripted per query.
///
/// Each query pops from its own script; once the script is empty the default
/// reply is used.
pub struct MockSource {
    kind: SourceKind,
    default: Reply,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(kind: SourceKind, default: Reply) -> Self {
        Self {
            kind,
            default,
            scripts: Mutex::new(HashMap::new()),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn primary(default: Reply) -> Self {
        Self::new(SourceKind::Primary, default)
    }

    pub fn fallback(default: Reply) -> Self {
        Self::new(SourceKind::Fallback, default)
    }

    pub fn script(self, query: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), replies.into());
        self
    }

    pub fn delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for MockSource {
    fn name(&self) -> &str {
        match self.kind {
            SourceKind::Primary => "mock-primary",
            SourceKind::Fallback => "mock-fallback",
        }
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn lookup(&self, query: &str, _mode: SearchMode) -> Result<SourceHit, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delays.get(query) {
            tokio::time::sleep(*delay).await;
        }
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(query)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone());
        reply.into_response(self.name())
    }
}
