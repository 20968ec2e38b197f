//! Fuzzing harnesses for the shmframe handoff protocol.
//!
//! The harnesses run an in-memory model of the protocol side by side with a
//! real channel and reader on the platform backend.

pub mod handoff_model;
