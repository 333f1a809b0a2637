//! Tail sizing by sweeping an external vortex-lattice solver over a grid of
//! candidate tails and fitting a static-margin response surface.

pub mod aero;
pub mod case;
pub mod config;
pub mod error;
pub mod fit;
pub mod generator;
pub mod geometry;
pub mod report;
pub mod results;
pub mod runner;
pub mod sizing;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use error::{Result, TailError};
