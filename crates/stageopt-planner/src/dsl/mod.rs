//! Textual front ends that build a `StageGraph`.

pub mod yaml;
