pub mod config;

pub use config::{
    BackoffConfig, BrowserConfig, BrowserType, CaptureConfig, HarnessConfig, ServiceConfig,
    ServiceMode,
};
