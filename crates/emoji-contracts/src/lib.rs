//! Shared types for the emoji maker: the persisted card list, the wire shape of
//! the generation endpoint and the local storage capability.

pub mod api;
pub mod entries;
pub mod storage;
