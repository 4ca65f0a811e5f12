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
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Vigil
//! Real-time risk-enforcement daemon for a futures brokerage gateway.
//!
//! Vigil observes each supervised account's live event streams (positions,
//! orders, trades, quotes, account status), evaluates a fixed catalog of
//! twelve risk rules, and enforces breaches against the brokerage - closing
//! positions, cancelling orders, applying lockouts - while recording every
//! decision durably so behavior survives crashes and daily resets.
//!
//! At a high level:
//! * Two realtime hubs (user + market) feed the [`engine`] dispatcher, which
//!   serialises events per account and routes them through the state plane.
//! * The state plane ([`state`], [`lockout`], [`timer`], [`reset`]) keeps the
//!   per-account world the rules evaluate against.
//! * The [`rules`] catalog maps `(event, state)` to breach descriptors.
//! * The [`enforce`] executor is the single component that mutates the
//!   outside world, with idempotent actions and a jittered retry policy.
//! * [`vigil_store`] keeps the crash-safe record everything reloads from.

/// Read-only snapshot accessors for dashboards and the admin CLI.
pub mod admin;

/// Daemon configuration document and startup validation.
pub mod config;

/// The enforcement executor - the only component that mutates the brokerage.
pub mod enforce;

/// Event dispatch: hub readers, per-account queues and workers, and the
/// per-account processing pipeline.
pub mod engine;

/// Defines all possible errors in the Vigil daemon.
pub mod error;

/// Typed daemon events routed to per-account workers.
pub mod event;

/// Per-account lockout slots with persistence and auto-expiry.
pub mod lockout;

/// Provides default Vigil Tracing logging initialisers.
pub mod logging;

/// Daily session-reset scheduling in a configured wall-clock zone.
pub mod reset;

/// The twelve-rule risk catalog.
pub mod rules;

/// The in-memory state plane: positions/orders, P&L, quotes, contract
/// metadata, trade frequency, pending protective stops.
pub mod state;

/// Named countdown timers swept by the 1 Hz tick.
pub mod timer;

/// Utilities for wiring and running a full daemon instance.
pub mod system;
