//! Stratus Core
//!
//! Host-side seams shared by providers: the resource and state value model,
//! attribute schemas, the provider trait, and the retry and waiter helpers
//! every resource implementation leans on.

pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod waiter;
