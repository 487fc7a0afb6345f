// Copyright (c) 2026 Oblipass Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Core engine for the oblipass oblivious password-hardening protocol:
//! curve-point validation and blind evaluation, per-user secret derivation,
//! admission control, login-location anomaly tracking, and majority-vote
//! trust resolution. Transport, persistence backends, email delivery, and
//! GeoIP databases stay outside this crate behind the interfaces in
//! [`record`] and [`location`].

pub mod curve;
pub mod derive;
pub mod error;
pub mod evaluator;
pub mod location;
pub mod rate;
pub mod record;
pub mod vote;
