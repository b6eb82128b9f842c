//! concord-server: HTTP orchestration for the Concord pipeline.

pub mod config;
pub mod http;
pub mod jobs;
pub mod pipeline;
