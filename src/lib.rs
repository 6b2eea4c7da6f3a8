//! Linear elasticity on a square with bilinear quadrilateral elements.
//!
//! The binary builds the square `[-1, 1]^2`, applies a body force made of
//! three small discs, clamps the boundary and solves a sequence of globally
//! refined problems, writing displacements, stresses and error indicators
//! for every cycle.

pub mod config;
pub mod datatypes;
pub mod driver;
pub mod element;
pub mod error;
pub mod estimator;
pub mod mesher;
pub mod post_processor;
pub mod problem;
pub mod rhs;
pub mod solver;
