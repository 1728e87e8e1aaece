//! Prefix-trie route table.
//!
//! Endpoints are registered by method and path template (`/users/{id}`,
//! `/files/{path+}`). Lookups capture path parameters, prefer static
//! segments over parameters and parameters over greedy segments, and fall
//! back to an `ANY` registration when the exact method is absent.

pub mod trie;

pub use trie::{normalize_path, RouteEntry, RouteMatch, Router, ANY_METHOD};
