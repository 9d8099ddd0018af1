//! Devicegraphs of block storage and the action graphs that turn one
//! devicegraph into another.

pub mod actiongraph;
pub mod constants;
pub mod devicegraph;
pub mod devices;
pub mod error;
pub mod primitives;
