//! # Farmstead Testing
//!
//! Testing utilities for the Farmstead state container.
//!
//! The main entry point is [`ReducerTest`], a fluent Given-When-Then harness
//! for exercising a reducer in isolation, without a running store.

mod reducer_test;

pub use reducer_test::{ReducerTest, assertions};
