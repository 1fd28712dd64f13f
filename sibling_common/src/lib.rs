//! Shared primitives for the sibling workspace.

pub mod lifecycle;
