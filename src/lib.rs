pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod matcher;
pub mod navigator;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod rules;
pub mod session;
