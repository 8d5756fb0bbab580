//! Connection-record store interface for ingestion tracking.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// What a store reports after recording an ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    /// True for exactly one caller per invitation id.
    pub first: bool,
    /// Ingestions recorded so far, this one included.
    pub count: u64,
}

/// Tracks which invitations have been ingested.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Atomically record an ingestion of `invitation_id`.
    ///
    /// Check and mark happen as one step: when callers race on the same id,
    /// exactly one of them sees `first == true`.
    async fn try_consume(&self, invitation_id: &str) -> Result<Consumption, CollaboratorError>;
}

/// Ingestion history of one invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionRecord {
    pub first_consumed_at: DateTime<Utc>,
    pub last_consumed_at: DateTime<Utc>,
    pub count: u64,
}

/// In-memory connection store.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    records: Mutex<HashMap<String, ConsumptionRecord>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, invitation_id: &str) -> Option<ConsumptionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(invitation_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn try_consume(&self, invitation_id: &str) -> Result<Consumption, CollaboratorError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        match records.get_mut(invitation_id) {
            Some(record) => {
                record.count += 1;
                record.last_consumed_at = now;
                Ok(Consumption {
                    first: false,
                    count: record.count,
                })
            }
            None => {
                records.insert(
                    invitation_id.to_string(),
                    ConsumptionRecord {
                        first_consumed_at: now,
                        last_consumed_at: now,
                        count: 1,
                    },
                );
                Ok(Consumption {
                    first: true,
                    count: 1,
                })
            }
        }
    }
}
