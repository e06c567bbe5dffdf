//! # fdc3-core
//!
//! Foundation types for the FDC3 interop agent.
//!
//! This crate provides the shared vocabulary the broker and server depend on:
//!
//! - **Branded IDs**: [`ids::InstanceId`], [`ids::ListenerId`],
//!   [`ids::RequestId`], [`ids::ChannelId`], [`ids::SessionId`] as newtypes
//! - **Context**: [`context::Context`] typed structured payloads
//! - **Directory metadata**: [`directory::DirectoryApp`],
//!   [`directory::AppIntent`], [`directory::AppMetadata`]
//! - **Errors**: [`errors::Fdc3Error`] taxonomy via `thiserror`, wire codes
//! - **Protocol**: [`protocol::ClientRequest`] / [`protocol::BrokerEvent`]
//!   wire message families, discriminated by a `type` tag
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other fdc3 crates.

#![deny(unsafe_code)]

pub mod constants;
pub mod context;
pub mod directory;
pub mod errors;
pub mod ids;
pub mod protocol;
