pub mod api;
pub mod chain;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod freshness;
pub mod run;
pub mod sink;
