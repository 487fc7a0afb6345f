// Copyright (c) 2026 Oblipass Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("oblipass.v1");
    }

    pub use v1::*;
}

pub const SERVER_VERSION: &str = "2.0.1";
pub const PROTOCOL_VERSION: &str = "2.0.*";

/// Literal answer for malformed or off-curve input. This is a protocol-level
/// negative result, not a fault.
pub const INVALID_RESPONSE: &str = "invalid";

/// An evaluation request is exactly four comma-separated fields.
pub const REQUEST_FIELDS: usize = 4;

/// First frame a server emits on any session. Clients treat it as a liveness
/// signal only; it never enters a vote tally because it has no comma fields.
#[must_use]
pub fn connection_banner() -> String {
    format!("__protocol_{PROTOCOL_VERSION}_connected__")
}

/// A parsed 4-field evaluation request: blinded point coordinates, the stable
/// user identifier, and the deployment-dependent aux field (an email or a
/// decimal key-version string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub x_hex: String,
    pub y_hex: String,
    pub user_hash: String,
    pub aux: String,
}

impl EvaluationRequest {
    /// Parses a client payload. A payload that does not split into exactly
    /// four comma-separated fields is not a request and is silently ignored
    /// by the serving pipeline.
    #[must_use]
    pub fn parse(payload: &str) -> Option<Self> {
        let fields: Vec<&str> = payload.split(',').collect();
        if fields.len() != REQUEST_FIELDS {
            return None;
        }
        Some(Self {
            x_hex: fields[0].to_string(),
            y_hex: fields[1].to_string(),
            user_hash: fields[2].to_string(),
            aux: fields[3].to_string(),
        })
    }

    #[must_use]
    pub fn to_payload(&self) -> String {
        format!(
            "{},{},{},{}",
            self.x_hex, self.y_hex, self.user_hash, self.aux
        )
    }
}

/// Returns true iff a payload may enter the trust tally: the invalid literal
/// or a two-field point. Banners and any other frame are dropped, which
/// defends the tally against malformed or compromised evaluator output.
#[must_use]
pub fn accepts_vote(payload: &str) -> bool {
    payload == INVALID_RESPONSE || payload.split(',').count() == 2
}
