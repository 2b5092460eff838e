#![forbid(unsafe_code)]

//! Transient-alert decision engine: per-source policies, telescope dispatch,
//! skymap repointing and the per-proposal decision state machine.

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod policy;
pub mod skymap;
pub mod state;
