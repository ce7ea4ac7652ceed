//! Background worker driving the generation scheduler.
//!
//! [`config`] reads the environment; [`loops`] holds the two periodic
//! tasks that submit pending work and reconcile in-flight work.

pub mod config;
pub mod loops;
