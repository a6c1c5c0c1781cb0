//! Error handling foundation for autoflow.
//!
//! Only the `Result` alias lives here. Each crate defines its own error enum
//! and wraps lower-layer reports with rootcause's `.context()` as they cross
//! a crate boundary.

use rootcause::Report;

/// A Result type alias using rootcause's Report.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
