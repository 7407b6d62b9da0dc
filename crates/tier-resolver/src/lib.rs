//! # tier-resolver
//!
//! Read path of the tiered record store: look a record up in the hot tier,
//! and fall back to the cold tier only when the hot tier reports a miss.

pub mod error;
pub mod resolver;

pub use error::ResolveError;
pub use resolver::{RecordRequest, Resolution, Resolver};
