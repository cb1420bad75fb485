#[cfg(feature = "ash")]
pub mod ash;
pub mod headless;
mod interface;

pub use interface::*;
