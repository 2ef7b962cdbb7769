//! Application services: thumbnail generation and error presentation.

pub mod error;
pub mod pipeline;
