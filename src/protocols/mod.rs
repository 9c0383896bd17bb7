//! Protocol implementations.
//!
//! - `echo`: line-oriented echo of everything a client sends

pub mod echo;
