pub mod buffer;
pub mod config;
pub mod error;
pub mod exporter;
pub mod fetcher;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod seeds;
pub mod sink;
