#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]

pub mod config;
pub mod error;
mod factory;
mod handle;
pub mod interceptor;
mod metrics;
mod pool;
pub mod queue;
mod reaper;
mod resource;

pub use self::{
    config::{PoolConfig, PoolConfigBuilder},
    error::{ConnectError, Error, Result},
    factory::{ConnectionFactory, SessionReset},
    handle::PooledConnection,
    interceptor::{Interceptor, InterceptorRegistry, Operation, Outcome},
    metrics::PoolState,
    pool::{CloseSummary, ConnectionPool, PoolStats},
    resource::ResourceInfo,
};
