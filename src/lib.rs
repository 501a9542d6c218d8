pub mod config;
pub mod links;
pub mod logging;
pub mod rules;
pub mod store;
pub mod stripper;
pub mod web;

pub use rules::RuleSet;
pub use stripper::{Location, Redirect, Stripper};
