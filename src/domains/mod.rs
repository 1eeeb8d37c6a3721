//! Domains module containing business logic organized by bounded contexts.
//!
//! The server has a single domain: tool execution.

pub mod tools;
