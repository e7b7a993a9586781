//! Filter expressions and their two evaluators.
//!
//! A single [`Filter`] AST is compiled to SQL for the storage path
//! ([`sql::compile`]) and interpreted over record maps for in-memory
//! migrations ([`operators::matches`]). Both agree on every input.

pub mod filter;
pub mod operators;
pub mod sql;

pub use filter::{Filter, FilterOp};
pub use operators::matches;
pub use sql::{compile, SqlFilter};
