//! Browser engine implementation using Playwright
//!
//! Each session gets its own Playwright browser context, so cookies, local
//! storage and cache never leak between scenarios.

use async_trait::async_trait;
use playwright::api::{
    Browser, BrowserContext as PwContext, Page, ScreenshotType, Viewport,
};
use playwright::Playwright;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::driver::traits::{
    BrowserContext, BrowserEngine, DriverResult, ElementAction, ElementRef, Probe, ProbeValue,
};
use crate::error::DriverError;
use crate::utils::config::{BrowserConfig, BrowserType};

/// Records console output into `window.__e2eConsole` on every document
const CONSOLE_HOOK: &str = r#"
(() => {
    if (window.__e2eConsole) return;
    window.__e2eConsole = [];
    for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
        const original = console[level];
        console[level] = (...args) => {
            try {
                window.__e2eConsole.push('[' + level + '] ' + args.map(String).join(' '));
            } catch (e) {}
            return original.apply(console, args);
        };
    }
    window.addEventListener('error', (e) => {
        window.__e2eConsole.push('[pageerror] ' + e.message);
    });
})();
"#;

const TEXT_JS: &str = "el => el.value || el.innerText || el.textContent || ''";

/// Playwright-backed browser engine
pub struct PlaywrightEngine {
    #[allow(dead_code)]
    playwright: Playwright,
    browser: Browser,
    config: BrowserConfig,
    name: String,
}

impl PlaywrightEngine {
    /// Initialize Playwright and launch the configured browser
    pub async fn launch(config: BrowserConfig) -> DriverResult<Self> {
        let playwright = Playwright::initialize()
            .await
            .map_err(|e| DriverError::disconnected(format!("Failed to initialize Playwright: {}", e)))?;

        let browser = match config.browser_type {
            BrowserType::Chromium => launch_chromium_browser(&playwright, &config).await?,
            BrowserType::Firefox => playwright
                .firefox()
                .launcher()
                .headless(config.headless)
                .launch()
                .await
                .map_err(DriverError::disconnected)?,
            BrowserType::Webkit => playwright
                .webkit()
                .launcher()
                .headless(config.headless)
                .launch()
                .await
                .map_err(DriverError::disconnected)?,
        };

        let name = format!("{:?}", config.browser_type).to_lowercase();
        log::info!("launched {} (headless: {})", name, config.headless);

        Ok(Self {
            playwright,
            browser,
            config,
            name,
        })
    }
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn new_context(&self) -> DriverResult<Box<dyn BrowserContext>> {
        let context = self
            .browser
            .context_builder()
            .build()
            .await
            .map_err(DriverError::disconnected)?;

        if let Err(e) = context.add_init_script(CONSOLE_HOOK).await {
            log::warn!("console capture unavailable for this context: {}", e);
        }

        let page = context.new_page().await.map_err(DriverError::disconnected)?;
        page.set_viewport_size(Viewport {
            width: self.config.viewport_width as i32,
            height: self.config.viewport_height as i32,
        })
        .await
        .map_err(DriverError::disconnected)?;

        Ok(Box::new(WebContext {
            context,
            page: Mutex::new(page),
        }))
    }

    async fn shutdown(&self) -> DriverResult<()> {
        self.browser.close().await.map_err(DriverError::disconnected)
    }
}

/// One isolated Playwright context with a single page
pub struct WebContext {
    context: PwContext,
    page: Mutex<Page>,
}

/// Map a Playwright error onto the harness taxonomy. A closed target means the
/// session is unusable; anything else is an ordinary action failure.
fn classify(err: impl std::fmt::Display) -> DriverError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("target closed")
        || lower.contains("has been closed")
        || lower.contains("browser has disconnected")
        || lower.contains("connection closed")
    {
        DriverError::Disconnected(message)
    } else {
        DriverError::Action(message)
    }
}

#[async_trait]
impl BrowserContext for WebContext {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .goto()
            .await
            .map_err(|e| classify(format!("Failed to navigate to {}: {}", url, e)))?;
        Ok(())
    }

    async fn find(&self, selector: &str) -> DriverResult<Option<ElementRef>> {
        let page = self.page.lock().await;
        let element = page.query_selector(selector).await.map_err(classify)?;
        Ok(element.map(|_| ElementRef {
            selector: selector.to_string(),
        }))
    }

    async fn act(&self, element: &ElementRef, action: &ElementAction) -> DriverResult<()> {
        let page = self.page.lock().await;
        let handle = page
            .query_selector(&element.selector)
            .await
            .map_err(classify)?
            .ok_or_else(|| DriverError::ElementNotFound(element.selector.clone()))?;

        match action {
            ElementAction::Click => {
                handle
                    .click_builder()
                    .click()
                    .await
                    .map_err(|e| classify(format!("Failed to click {}: {}", element.selector, e)))?;
            }
            ElementAction::Fill(value) => {
                handle
                    .fill_builder(value)
                    .fill()
                    .await
                    .map_err(|e| classify(format!("Failed to fill {}: {}", element.selector, e)))?;
            }
        }
        Ok(())
    }

    async fn evaluate(&self, probe: &Probe) -> DriverResult<ProbeValue> {
        let page = self.page.lock().await;
        match probe {
            Probe::Visible(selector) => {
                let visible = match page.query_selector(selector).await.map_err(classify)? {
                    Some(el) => el.is_visible().await.map_err(classify)?,
                    None => false,
                };
                Ok(ProbeValue::Bool(visible))
            }
            Probe::Text(selector) => {
                if page.query_selector(selector).await.map_err(classify)?.is_none() {
                    return Ok(ProbeValue::Text(None));
                }
                let text: String = page
                    .evaluate_on_selector::<String, _>(selector, TEXT_JS, None::<String>)
                    .await
                    .map_err(classify)?;
                Ok(ProbeValue::Text(Some(text)))
            }
            Probe::Url => {
                let url: String = page
                    .evaluate("() => window.location.href", ())
                    .await
                    .map_err(classify)?;
                Ok(ProbeValue::Text(Some(url)))
            }
            Probe::Title => {
                let title: String = page
                    .evaluate("() => document.title", ())
                    .await
                    .map_err(classify)?;
                Ok(ProbeValue::Text(Some(title)))
            }
        }
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let page = self.page.lock().await;
        let bytes = page
            .screenshot_builder()
            .r#type(ScreenshotType::Png)
            .screenshot()
            .await
            .map_err(classify)?;
        Ok(bytes)
    }

    async fn console_log(&self) -> DriverResult<Vec<String>> {
        let page = self.page.lock().await;
        let lines: Vec<String> = page
            .evaluate("() => (window.__e2eConsole || []).slice()", ())
            .await
            .map_err(classify)?;
        Ok(lines)
    }

    async fn close(&self) -> DriverResult<()> {
        self.context.close().await.map_err(classify)
    }
}

/// Launch Chromium with container-friendly flags
async fn launch_chromium_browser(
    playwright: &Playwright,
    config: &BrowserConfig,
) -> DriverResult<Browser> {
    let chromium = playwright.chromium();
    let mut launcher = chromium.launcher().headless(config.headless);

    let executable = config.executable.clone().or_else(find_system_browser);
    if let Some(ref path) = executable {
        log::info!("using browser executable {}", path.display());
        launcher = launcher.executable(path);
    } else {
        log::info!("no browser executable found, using the Playwright-managed build");
    }

    let mut args: Vec<String> = [
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(config.args.iter().cloned());

    let browser = launcher
        .args(&args)
        .launch()
        .await
        .map_err(DriverError::disconnected)?;
    Ok(browser)
}

fn find_system_browser() -> Option<PathBuf> {
    let common_paths = [
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    for path in common_paths {
        let p = std::path::Path::new(path);
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    ["chromium", "chromium-browser", "google-chrome"]
        .iter()
        .find_map(|name| which::which(name).ok())
}
