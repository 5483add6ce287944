//! Items domain module.
//!
//! This crate contains the item record and its validation rules, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod item;

pub use item::{Item, NewItem, PROCESSED_STATUS};
