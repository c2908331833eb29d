//! Turnstile - admission control for a content-generation API
//!
//! This crate decides, per request, whether a caller may proceed. It layers a
//! fixed-window rate limiter and a period usage accountant in front of an
//! unreliable text-generation provider, which it calls with bounded retries
//! and per-resource fallback content.

pub mod admission;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod ratelimit;
pub mod upstream;
pub mod usage;
