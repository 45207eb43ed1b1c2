pub mod driver;
pub mod error;
pub mod parser;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use error::{HarnessError, Result};
pub use parser::load_scenarios;
pub use report::{generate_report, RunReport};
pub use runner::{run_tests, CancelSignal, Harness};
pub use utils::config::HarnessConfig;
