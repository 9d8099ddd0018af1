//! sysdefs (System Definitions) holds plain definitions of system concepts
//! shared by the other crates: size units and the filesystem types with their
//! size and resize limits.

pub mod filesystems;
pub mod units;
