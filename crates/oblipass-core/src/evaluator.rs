use std::sync::Arc;

use oblipass_protocol::{EvaluationRequest, INVALID_RESPONSE};

use crate::curve::CurvePoint;
use crate::derive::{RecordPatch, SecretDeriver};
use crate::record::{RecordFields, RecordStore, StoreError, UserRecord};

/// Answers one oblivious-evaluation request: validate the point, resolve key
/// material, derive the secret, multiply, encode. Storage faults degrade to
/// first-use defaults; only invalid curve input produces a negative answer.
pub struct Evaluator {
    store: Arc<dyn RecordStore>,
    deriver: Arc<dyn SecretDeriver>,
}

impl Evaluator {
    pub fn new(store: Arc<dyn RecordStore>, deriver: Arc<dyn SecretDeriver>) -> Self {
        Self { store, deriver }
    }

    /// Produces the wire response literal for a request: either the encoded
    /// evaluated point or the `"invalid"` sentinel. Never fails.
    pub async fn respond(&self, request: &EvaluationRequest) -> String {
        let point = match CurvePoint::decode(&request.x_hex, &request.y_hex) {
            Ok(point) => point,
            Err(err) => {
                tracing::debug!(user_hash = %request.user_hash, error = %err, "rejecting malformed point");
                return INVALID_RESPONSE.to_string();
            }
        };
        if !point.is_member() {
            tracing::debug!(user_hash = %request.user_hash, "point is not a member of the curve");
            return INVALID_RESPONSE.to_string();
        }

        let record = match self.store.get(&request.user_hash).await {
            Ok(record) => Some(record),
            // First use: the record is created lazily below.
            Err(StoreError::NotFound) => None,
            Err(err) => {
                tracing::warn!(user_hash = %request.user_hash, error = %err, "record lookup failed; deriving with defaults");
                None
            }
        };

        let outcome = self
            .deriver
            .derive(&request.user_hash, &request.aux, record.as_ref());
        if let Some(patch) = outcome.patch {
            self.apply_patch(&request.user_hash, patch).await;
        }

        match point.multiply(&outcome.secret) {
            Ok(evaluated) => evaluated.encode(),
            Err(err) => {
                tracing::warn!(user_hash = %request.user_hash, error = %err, "scalar multiplication failed");
                INVALID_RESPONSE.to_string()
            }
        }
    }

    async fn apply_patch(&self, user_hash: &str, patch: RecordPatch) {
        let result = match patch {
            RecordPatch::CreateWithEmail(email) => {
                self.store
                    .create(UserRecord {
                        user_hash: user_hash.to_string(),
                        email: (!email.is_empty()).then_some(email),
                        ..UserRecord::default()
                    })
                    .await
            }
            RecordPatch::CreateWithVersion(version) => {
                self.store
                    .create(UserRecord {
                        user_hash: user_hash.to_string(),
                        key_version: Some(version),
                        ..UserRecord::default()
                    })
                    .await
            }
            RecordPatch::SetKeyVersion(version) => {
                let fields = RecordFields {
                    key_version: Some(version),
                    ..RecordFields::default()
                };
                self.store.update(user_hash, fields).await
            }
        };
        match result {
            // A concurrent request won the first-use race; nothing to do.
            Ok(()) | Err(StoreError::Conflict) => {}
            Err(err) => {
                tracing::warn!(user_hash, error = %err, "record patch failed; continuing");
            }
        }
    }
}
