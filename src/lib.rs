pub mod collector;
pub mod config;
pub mod database;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod sequence;
pub mod writer;
