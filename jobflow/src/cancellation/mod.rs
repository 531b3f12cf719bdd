//! Job kill handling.
//!
//! Kills are cooperative: a request only flips shared flags, and the state
//! machine observes them between stage attempts.

mod kill;

pub use kill::{KillCallback, KillHandle, KillSource, KillSwitch};
