//! Cross-crate tests for Lease Keeper.
//!
//! The tests live under `tests/` and run against the in-memory providers.
