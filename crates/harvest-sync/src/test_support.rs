use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvest_storage::{BrowsingContext, RenderError, Renderer};

#[derive(Debug, Default)]
pub struct RenderStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    visited: Mutex<Vec<String>>,
}

impl RenderStats {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

/// In-memory renderer: serves canned markup, fails configured URLs and counts open contexts.
#[derive(Debug, Default)]
pub struct FakeRenderer {
    pages: Arc<HashMap<String, String>>,
    failing: Arc<HashSet<String>>,
    delay: Duration,
    stats: Arc<RenderStats>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_page(mut self, url: &str, markup: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), markup.to_string());
        self
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        Arc::make_mut(&mut self.failing).insert(url.to_string());
        self
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, RenderError> {
        let now_active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now_active, Ordering::SeqCst);
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            pages: Arc::clone(&self.pages),
            failing: Arc::clone(&self.failing),
            delay: self.delay,
            stats: Arc::clone(&self.stats),
            page: None,
            closed: false,
        }))
    }
}

struct FakeContext {
    pages: Arc<HashMap<String, String>>,
    failing: Arc<HashSet<String>>,
    delay: Duration,
    stats: Arc<RenderStats>,
    page: Option<String>,
    closed: bool,
}

#[async_trait]
impl BrowsingContext for FakeContext {
    async fn goto(&mut self, url: &str) -> Result<(), RenderError> {
        self.stats.visited.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if self.failing.contains(url) {
            return Err(RenderError::HttpStatus {
                status: 503,
                url: url.to_string(),
            });
        }
        let markup = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("<html><body>{url}</body></html>"));
        self.page = Some(markup);
        Ok(())
    }

    async fn content(&self) -> Result<String, RenderError> {
        self.page.clone().ok_or(RenderError::NoPage)
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        if !self.closed {
            self.closed = true;
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Buffer behind a `tracing` fmt subscriber, for asserting on status lines.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish()
    }

    pub fn lines(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned();
        text.lines().map(str::to_string).collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
