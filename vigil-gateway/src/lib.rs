#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Vigil-Gateway
//! Brokerage gateway boundary for the Vigil risk-enforcement daemon.
//!
//! Defines the typed data model the gateway speaks (positions, orders, trades,
//! quotes, account updates, contract metadata), the REST capability set the
//! daemon consumes, and the realtime hub interfaces with their reconnection
//! utilities. The wire encoding of the realtime transport is deliberately
//! outside this crate - implementations plug in behind [`realtime::UserHub`]
//! and [`realtime::MarketHub`].

/// Opaque credential provider interface used to authenticate gateway
/// connections.
pub mod credentials;

/// All gateway boundary errors, with the transient / rate-limit / auth / fatal
/// taxonomy used by retry policies.
pub mod error;

/// Gateway entity identifiers.
pub mod id;

/// In-memory gateway implementation for tests and paper runs.
pub mod mock;

/// Realtime hub interfaces (user hub + market hub), hub connection state, and
/// reconnection backoff utilities.
pub mod realtime;

/// REST capability set consumed by the daemon, and the default JSON/HTTP
/// implementation.
pub mod rest;

/// Gateway wire data model.
///
/// eg/ `PositionSnapshot`, `OrderSnapshot`, `TradeFill`, `QuoteUpdate`, etc.
pub mod types;
