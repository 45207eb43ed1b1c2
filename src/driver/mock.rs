//! Scripted in-memory browser used by the runner tests.
//!
//! Pages are keyed by URL path. Clicking an element with a `navigates_to`
//! target moves the context to that page. Failures can be queued per selector
//! (or per path for navigation) and are shared by every context of the engine,
//! so a flaky element stays flaky across attempts.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{
    BrowserContext, BrowserEngine, DriverResult, ElementAction, ElementRef, Probe, ProbeValue,
};
use crate::error::DriverError;

#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub visible: bool,
    pub text: String,
    pub navigates_to: Option<String>,
}

impl MockElement {
    pub fn visible(text: &str) -> Self {
        Self {
            visible: true,
            text: text.to_string(),
            navigates_to: None,
        }
    }

    pub fn hidden(text: &str) -> Self {
        Self {
            visible: false,
            ..Self::visible(text)
        }
    }

    pub fn navigates_to(mut self, path: &str) -> Self {
        self.navigates_to = Some(path.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub title: String,
    pub elements: HashMap<String, MockElement>,
}

impl MockPage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            elements: HashMap::new(),
        }
    }

    pub fn element(mut self, selector: &str, element: MockElement) -> Self {
        self.elements.insert(selector.to_string(), element);
        self
    }
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub screenshots: AtomicUsize,
}

impl MockStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.created() - self.closed()
    }
}

#[derive(Clone, Default)]
pub struct MockEngine {
    pages: Arc<HashMap<String, MockPage>>,
    failures: Arc<Mutex<HashMap<String, VecDeque<DriverError>>>>,
    context_failures: Arc<Mutex<VecDeque<DriverError>>>,
    delay: Option<Duration>,
    screenshot_fails: bool,
    pub stats: Arc<MockStats>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, path: &str, page: MockPage) -> Self {
        Arc::make_mut(&mut self.pages).insert(path.to_string(), page);
        self
    }

    /// Queue `times` failures for actions on `key` (a selector, or a path for navigation)
    pub fn fail(self, key: &str, times: usize, error: DriverError) -> Self {
        {
            let mut failures = self.failures.lock().unwrap();
            let queue = failures.entry(key.to_string()).or_default();
            for _ in 0..times {
                queue.push_back(error.clone());
            }
        }
        self
    }

    pub fn fail_new_context(self, error: DriverError) -> Self {
        self.context_failures.lock().unwrap().push_back(error);
        self
    }

    /// Sleep before every navigation and element action
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failing_screenshots(mut self) -> Self {
        self.screenshot_fails = true;
        self
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn new_context(&self) -> DriverResult<Box<dyn BrowserContext>> {
        if let Some(err) = self.context_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            engine: self.clone(),
            state: Mutex::new(ContextState::default()),
        }))
    }

    async fn shutdown(&self) -> DriverResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ContextState {
    url: String,
    values: HashMap<String, String>,
    console: Vec<String>,
    closed: bool,
}

pub struct MockContext {
    engine: MockEngine,
    state: Mutex<ContextState>,
}

/// Split `http://host:port/path?q` into (`http://host:port`, `/path`)
fn split_url(url: &str) -> (&str, &str) {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => {
            let (origin, rest) = url.split_at(after_scheme + i);
            (origin, rest.split('?').next().unwrap_or(rest))
        }
        None => (url, "/"),
    }
}

impl MockContext {
    async fn pause(&self) {
        if let Some(delay) = self.engine.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_failure(&self, key: &str) -> Option<DriverError> {
        self.engine
            .failures
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|q| q.pop_front())
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.state.lock().unwrap().closed {
            return Err(DriverError::disconnected("context has been closed"));
        }
        Ok(())
    }

    fn current_page(&self) -> Option<MockPage> {
        let state = self.state.lock().unwrap();
        let (_, path) = split_url(&state.url);
        self.engine.pages.get(path).cloned()
    }

    fn element(&self, selector: &str) -> Option<MockElement> {
        self.current_page()
            .and_then(|page| page.elements.get(selector).cloned())
    }
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.ensure_open()?;
        self.pause().await;
        let (_, path) = split_url(url);
        if let Some(err) = self.take_failure(path) {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.values.clear();
        state.console.push(format!("[log] loaded {}", path));
        Ok(())
    }

    async fn find(&self, selector: &str) -> DriverResult<Option<ElementRef>> {
        self.ensure_open()?;
        Ok(self.element(selector).map(|_| ElementRef {
            selector: selector.to_string(),
        }))
    }

    async fn act(&self, element: &ElementRef, action: &ElementAction) -> DriverResult<()> {
        self.ensure_open()?;
        self.pause().await;
        if let Some(err) = self.take_failure(&element.selector) {
            return Err(err);
        }
        let target = self
            .element(&element.selector)
            .ok_or_else(|| DriverError::ElementNotFound(element.selector.clone()))?;

        let mut state = self.state.lock().unwrap();
        match action {
            ElementAction::Fill(value) => {
                state.values.insert(element.selector.clone(), value.clone());
            }
            ElementAction::Click => {
                if let Some(path) = target.navigates_to {
                    let (origin, _) = split_url(&state.url);
                    state.url = format!("{}{}", origin, path);
                    state.values.clear();
                }
            }
        }
        Ok(())
    }

    async fn evaluate(&self, probe: &Probe) -> DriverResult<ProbeValue> {
        self.ensure_open()?;
        let value = match probe {
            Probe::Visible(selector) => {
                ProbeValue::Bool(self.element(selector).map_or(false, |e| e.visible))
            }
            Probe::Text(selector) => {
                let filled = self.state.lock().unwrap().values.get(selector).cloned();
                ProbeValue::Text(filled.or_else(|| self.element(selector).map(|e| e.text)))
            }
            Probe::Url => ProbeValue::Text(Some(self.state.lock().unwrap().url.clone())),
            Probe::Title => ProbeValue::Text(self.current_page().map(|p| p.title)),
        };
        Ok(value)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        if self.engine.screenshot_fails {
            return Err(DriverError::action("screenshot failed"));
        }
        self.engine.stats.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG\r\n\x1a\nmock".to_vec())
    }

    async fn console_log(&self) -> DriverResult<Vec<String>> {
        Ok(self.state.lock().unwrap().console.clone())
    }

    async fn close(&self) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            self.engine.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Two-page library app: add a book, land on the catalog, borrow it
pub fn library_app() -> MockEngine {
    MockEngine::new()
        .page(
            "/add_book",
            MockPage::new("Add Book")
                .element("input[name=\"title\"]", MockElement::visible(""))
                .element("input[name=\"author\"]", MockElement::visible(""))
                .element(
                    "button[type=\"submit\"]",
                    MockElement::visible("Add Book").navigates_to("/catalog"),
                ),
        )
        .page(
            "/catalog",
            MockPage::new("Catalog")
                .element("body", MockElement::visible("Catalog Playwright Test Book"))
                .element("input[name=\"patron_id\"]", MockElement::visible(""))
                .element(
                    "button.borrow",
                    MockElement::visible("Borrow").navigates_to("/catalog/borrowed"),
                )
                .element(".flash-error", MockElement::hidden("")),
        )
        .page(
            "/catalog/borrowed",
            MockPage::new("Catalog").element(
                ".flash-success",
                MockElement::visible("Successfully borrowed \"Playwright Test Book\""),
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_url() {
        assert_eq!(
            split_url("http://127.0.0.1:5000/catalog?page=2"),
            ("http://127.0.0.1:5000", "/catalog")
        );
        assert_eq!(split_url("http://localhost"), ("http://localhost", "/"));
    }

    #[tokio::test]
    async fn test_click_navigates_and_failures_are_consumed() {
        let engine = library_app().fail(
            "button[type=\"submit\"]",
            1,
            DriverError::action("detached"),
        );
        let ctx = engine.new_context().await.unwrap();
        ctx.navigate("http://localhost:5000/add_book").await.unwrap();

        let button = ctx.find("button[type=\"submit\"]").await.unwrap().unwrap();
        assert!(ctx.act(&button, &ElementAction::Click).await.is_err());
        ctx.act(&button, &ElementAction::Click).await.unwrap();

        let url = ctx.evaluate(&Probe::Url).await.unwrap();
        assert_eq!(url.as_text(), Some("http://localhost:5000/catalog"));

        ctx.close().await.unwrap();
        ctx.close().await.unwrap();
        assert_eq!(engine.stats.created(), 1);
        assert_eq!(engine.stats.closed(), 1);
        assert!(ctx.navigate("http://localhost:5000/").await.is_err());
    }
}
