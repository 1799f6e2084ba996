pub mod branch_matcher;
pub mod changelog;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod git;
pub mod git_ops;
pub mod lockfile;
pub mod process;
pub mod release;
pub mod release_list;
pub mod resolver;
pub mod storage;
pub mod ui;
pub mod update_api;
pub mod version_tracker;
pub mod warning;

pub use error::{ReleaseError, Result};
