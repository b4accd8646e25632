//! Utilities for testing code that builds on the traversal protocol. They are part of the
//!  crate's regular code so applications can use them in their own tests.

pub mod message;
pub mod peer;
