use crate::error::DriverError;
use async_trait::async_trait;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Handle to an element resolved by [`BrowserContext::find`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub selector: String,
}

/// Interaction performed on a resolved element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementAction {
    Click,
    Fill(String),
}

/// Read-only query against the current page. No script is shipped by the
/// caller; the engine decides how to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Whether an element matching the selector is visible
    Visible(String),
    /// Text content of the first match, `None` when nothing matches
    Text(String),
    Url,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeValue {
    Bool(bool),
    Text(Option<String>),
}

impl ProbeValue {
    pub fn as_bool(&self) -> bool {
        match self {
            ProbeValue::Bool(b) => *b,
            ProbeValue::Text(t) => t.is_some(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ProbeValue::Text(t) => t.as_deref(),
            ProbeValue::Bool(_) => None,
        }
    }
}

/// Browser automation capability: hands out isolated contexts
///
/// An engine is launched once per run and shared by every worker. Contexts
/// created from it must not share cookies or storage.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Engine name for logs and reports (e.g. "chromium")
    fn name(&self) -> &str;

    /// Create a fresh, isolated browser context with one open page
    async fn new_context(&self) -> DriverResult<Box<dyn BrowserContext>>;

    /// Close the browser. Contexts still open are invalidated.
    async fn shutdown(&self) -> DriverResult<()>;
}

/// One isolated browser context. Operations are issued sequentially by a
/// single attempt; implementations need not support concurrent calls.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Resolve a selector, `None` when nothing matches right now
    async fn find(&self, selector: &str) -> DriverResult<Option<ElementRef>>;

    async fn act(&self, element: &ElementRef, action: &ElementAction) -> DriverResult<()>;

    async fn evaluate(&self, probe: &Probe) -> DriverResult<ProbeValue>;

    /// PNG bytes of the current viewport
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// Console messages recorded since the context was created
    async fn console_log(&self) -> DriverResult<Vec<String>>;

    async fn close(&self) -> DriverResult<()>;
}
