//! A continuous-time limit-order matching engine for a crypto exchange.
//!
//! This crate is a library, not a binary: [`bootstrap::start`] wires up
//! configuration, persistence, and the dispatcher, and returns a
//! [`dispatcher::MatcherDispatcher`] for a host process to drive over
//! whatever transport (HTTP, gRPC, a message queue) it chooses. The
//! settlement-layer chain client, the matcher's signing wallet, and any
//! outer transport are all external collaborators supplied by that host.

pub mod book;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod history;
pub mod metrics;
pub mod settlement;
pub mod signing;
pub mod validator;

pub use bootstrap::{init_tracing, start};
pub use dispatcher::MatcherDispatcher;
