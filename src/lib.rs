#![deny(dead_code)]
#![deny(unused_imports)]

//! Simulation and analysis core for the rescue-therapy missingness figure.
//!
//! The pipeline is linear: build a longitudinal design ([`design`]), draw one
//! realization of the response vector under a linear mixed model
//! ([`simulate`]), impose informative missingness through simulated rescue
//! therapy ([`censoring`]), fit the three model variants ([`lmm`],
//! [`scenario`]) and render the fitted trajectories ([`plot`]). Everything is
//! deterministic given the seed; see [`scenario::run_scenario`] for the
//! canonical order of random draws.

pub mod censoring;
pub mod design;
pub mod lmm;
pub mod plot;
pub mod scenario;
pub mod simulate;
pub mod table;
