//! Core building blocks of the estimation problem
//!
//! This module contains the data the pipeline manipulates:
//! - Keys and the key manager
//! - Noise models
//! - Values (estimates and initial guesses)
//! - Factors and the factor graph
//! - Sensor measurements grouped by timestep
//! - The accumulator holding the graph delta between solver updates

pub mod accumulator;
pub mod factors;
pub mod key;
pub mod measurements;
pub mod noise;
pub mod values;
