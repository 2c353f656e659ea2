//! Core types shared by the Steward crates.
//!
//! The [`coordination`] module describes the strongly-consistent coordination service
//! the leadership controller consumes, and ships an in-process implementation of it.

pub mod coordination;
