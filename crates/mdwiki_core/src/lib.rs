pub mod changelog;
pub mod config;
pub mod conflict;
pub mod error;
pub mod git;
pub mod links;
pub mod notice;
pub mod page;
pub mod process;
pub mod render;
pub mod runtime;
pub mod store;
pub mod vcs;
pub mod wiki;

pub use error::{Result, WikiError};
