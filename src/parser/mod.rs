pub mod types;
pub mod yaml;

pub use types::{Condition, FillParams, Scenario, Step, TextContainsParams, WaitParams};
pub use yaml::{load_scenarios, parse_scenario_file};
