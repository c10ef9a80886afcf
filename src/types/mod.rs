//! Types that are used across multiple components of the keeper.
//!
//! Other types, specific to single components, live in the components themselves, e.g.,
//! [`crate::leader::LeaderState`].

pub mod committee;

pub mod data_types;

pub mod task;
