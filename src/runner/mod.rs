pub mod artifacts;
pub mod attempt;
pub mod backoff;
pub mod cancel;
pub mod context;
pub mod events;
pub mod executor;
pub mod launcher;
pub mod pool;
pub mod retry;
pub mod scenario;
pub mod state;

use crate::driver::{BrowserEngine, PlaywrightEngine};
use crate::parser::Scenario;
use crate::report::{self, RunReport};
use crate::utils::config::HarnessConfig;
use crate::error::HarnessError;
use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

pub use cancel::CancelSignal;
pub use events::*;
pub use executor::Harness;
pub use state::*;

/// Run scenarios against a freshly launched browser, write every report and
/// print the console summary
pub async fn run_tests(
    scenarios: Vec<Scenario>,
    config: HarnessConfig,
    cancel: CancelSignal,
) -> Result<RunReport> {
    let engine = PlaywrightEngine::launch(config.browser.clone())
        .await
        .map_err(HarnessError::Browser)?;
    let engine: Arc<dyn BrowserEngine> = Arc::new(engine);

    let output_dir = config.output_dir.clone();
    let harness = Harness::new(config, engine.clone(), cancel);
    let listener = harness.spawn_console();
    let report = harness.run(scenarios).await;

    // Closing the emitter lets the console listener drain and exit
    drop(harness);
    let _ = listener.await;

    if let Err(e) = engine.shutdown().await {
        log::warn!("browser shutdown failed: {}", e);
    }

    let report_dir = report::write_reports(&report, &output_dir)?;
    report::summary::print(&report);
    println!(
        "\n{} Reports saved to: {}",
        "📄".to_string().blue(),
        report_dir.display().to_string().cyan()
    );

    Ok(report)
}
