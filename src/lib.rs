//! Compiler for the Pastel language.
//!
//! Source text is tokenized and parsed by [`frontend`], then [`middle`]
//! resolves types and lowers every function into typed SSA (LIR).

pub mod config;
pub mod frontend;
pub mod index;
pub mod log;
pub mod middle;
