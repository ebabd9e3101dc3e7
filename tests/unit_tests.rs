//! Entry point for the component-level test modules under `tests/unit/`.

mod common;
mod unit;
