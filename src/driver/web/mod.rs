mod driver;

pub use driver::{PlaywrightEngine, WebContext};
