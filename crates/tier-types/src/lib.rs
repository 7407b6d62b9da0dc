//! # tier-types
//!
//! Shared domain types for the tiered record store.
//!
//! - [`Record`]: an `id` plus opaque payload fields, with a retention `timestamp`
//! - [`ChangeEvent`]: a committed change delivered by a tier's change feed
//! - [`Lookup`]: explicit found / not-found outcome of a point read
//! - [`TierError`]: transient, fatal, malformed-record and configuration errors
//! - [`RetentionPeriod`]: the age after which records move to the cold tier
//! - [`Settings`]: layered configuration
//!
//! Tier handles are reached only through the [`RecordReader`],
//! [`RecordWriter`] and [`ChangeFeed`] traits.

pub mod change;
pub mod config;
pub mod error;
pub mod partition;
pub mod record;
pub mod retention;
pub mod tier;

pub use change::ChangeEvent;
pub use config::{ArchiverSettings, RetrySettings, Settings, TierSettings};
pub use error::TierError;
pub use partition::partition_for;
pub use record::{parse_timestamp, Record, ID_FIELD, TIMESTAMP_FIELD};
pub use retention::RetentionPeriod;
pub use tier::{ChangeFeed, Lookup, RecordReader, RecordWriter, Tier, TierKind};
