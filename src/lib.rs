//! aerolive - Live model subscriptions
//!
//! Client: batched, de-duplicated subscriptions kept alive by periodic
//! renewal. Server: resolves whether anyone listens to a changed record
//! before publishing it on the team channel.

pub mod broadcast;
pub mod config;
pub mod observability;
pub mod protocol;
pub mod subscription;
pub mod transport;
