//! Data types shared across the pipeline.

pub mod category;
pub mod manifest;
pub mod property;
pub mod run;
pub mod state;
