//! Nimbus: intent-driven security policy for Kubernetes.
//!
//! Users declare abstract security intents and bind them to workloads. The
//! operator resolves each binding into one engine-agnostic policy document;
//! independent adapters translate that document into policies for the
//! engines that enforce them, owning and garbage-collecting what they create.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod logging;

pub mod api;
pub mod cluster;
pub mod idpool;

pub mod pipeline;

pub mod dispatcher;
pub mod operator;

pub mod adapter;

pub mod manifests;
