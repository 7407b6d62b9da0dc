//! Tiered point lookup.
//!
//! The hot tier is consulted first. Only an explicit miss falls through to
//! the cold tier; a hot-tier failure is returned as is, since it says
//! nothing about where the record lives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tier_types::{Lookup, Record, RecordReader, TierKind};

use crate::error::ResolveError;

/// Request body accepted by [`Resolver::handle_request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRequest {
    pub id: String,
}

/// A record together with the tier that served it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub record: Record,
    pub source: TierKind,
}

/// Reads a record from whichever tier holds it.
pub struct Resolver {
    hot: Arc<dyn RecordReader>,
    cold: Arc<dyn RecordReader>,
}

impl Resolver {
    pub fn new(hot: Arc<dyn RecordReader>, cold: Arc<dyn RecordReader>) -> Self {
        Self { hot, cold }
    }

    /// Fetch a record by id, hot tier first.
    pub async fn get_record(&self, id: &str) -> Result<Record, ResolveError> {
        self.resolve(id).await.map(|resolution| resolution.record)
    }

    /// Like [`Resolver::get_record`], also reporting the serving tier.
    ///
    /// At most two reads, in order, without retries.
    pub async fn resolve(&self, id: &str) -> Result<Resolution, ResolveError> {
        if id.trim().is_empty() {
            return Err(ResolveError::InvalidRequest(
                "id must not be empty".to_string(),
            ));
        }

        match self.hot.read(id).await {
            Ok(Lookup::Found(record)) => {
                debug!(id = %id, tier = %self.hot.name(), "Resolved from hot tier");
                return Ok(Resolution {
                    record,
                    source: self.hot.kind(),
                });
            }
            Ok(Lookup::NotFound) => {
                debug!(id = %id, tier = %self.hot.name(), "Hot tier miss, trying cold tier");
            }
            Err(e) => {
                warn!(id = %id, tier = %self.hot.name(), error = %e, "Hot tier read failed");
                return Err(e.into());
            }
        }

        match self.cold.read(id).await {
            Ok(Lookup::Found(record)) => {
                debug!(id = %id, tier = %self.cold.name(), "Resolved from cold tier");
                Ok(Resolution {
                    record,
                    source: self.cold.kind(),
                })
            }
            Ok(Lookup::NotFound) => Err(ResolveError::NotFound { id: id.to_string() }),
            Err(e) => {
                warn!(id = %id, tier = %self.cold.name(), error = %e, "Cold tier read failed");
                Err(e.into())
            }
        }
    }

    /// Parse a JSON [`RecordRequest`] and resolve it.
    pub async fn handle_request(&self, body: &[u8]) -> Result<Record, ResolveError> {
        self.resolve_request(body)
            .await
            .map(|resolution| resolution.record)
    }

    /// Like [`Resolver::handle_request`], also reporting the serving tier.
    pub async fn resolve_request(&self, body: &[u8]) -> Result<Resolution, ResolveError> {
        let request: RecordRequest = serde_json::from_slice(body)
            .map_err(|e| ResolveError::InvalidRequest(e.to_string()))?;
        self.resolve(&request.id).await
    }
}
