#[cfg(test)]
pub(crate) mod mock;
pub mod traits;
pub mod web;

pub use traits::{
    BrowserContext, BrowserEngine, DriverResult, ElementAction, ElementRef, Probe, ProbeValue,
};
pub use web::PlaywrightEngine;
