pub mod client;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod sse;
pub mod upstream;
pub mod web;
