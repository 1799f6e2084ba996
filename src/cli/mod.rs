//! Command line workflows

pub mod orchestration;

pub use orchestration::{FetchTagPushArgs, NextTagArgs, ReleaseContext};
