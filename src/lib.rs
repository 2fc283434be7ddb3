pub mod composer;
pub mod data;
pub mod distributions;
pub mod error;
pub mod io;
pub mod mixture;
pub mod models;
pub mod rng;
pub mod sampler;
pub mod stats;
pub mod strategy;
mod timer;
