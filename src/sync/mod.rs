//! Client-side reconciliation against the authoritative clock.
//!
//! One [`controller::Controller`] per event issues commands and keeps a local mirror;
//! any number of [`observer::Observer`]s poll and extrapolate between polls.

pub mod controller;
pub mod observer;
pub mod poller;
