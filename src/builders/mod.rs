//! Builders to construct image managers from configuration.

pub mod manager_builder;

pub use manager_builder::ImageManagerBuilder;
