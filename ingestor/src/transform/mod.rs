//! Canonical transform engine (C6).

pub mod minute_builder;
