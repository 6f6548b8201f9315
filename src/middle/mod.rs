//! Types are resolved here and the AST is lowered straight into LIR, where
//! the function is verified and optionally optimized.

pub mod coerce;
pub mod error;
pub mod lir;
pub mod lowering;
pub mod primitive;
pub mod scope;
pub mod ty;
