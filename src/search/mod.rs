//! Document stores and the operations that combine their results.

pub mod bm25;
pub mod combine;
pub mod vector;
