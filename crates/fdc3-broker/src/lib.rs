//! # fdc3-broker
//!
//! The per-session interop broker: channels and context broadcast,
//! listener subscriptions, the app-instance lifecycle, intent raising and
//! resolution, and queued point-to-point delivery.
//!
//! The broker core is transport- and UI-agnostic. Hosting environments
//! plug in four collaborators — [`collaborators::Directory`],
//! [`collaborators::Resolver`], [`collaborators::Launcher`], and
//! [`collaborators::Transport`] — and drive everything through
//! [`broker::Broker`].

#![deny(unsafe_code)]

pub mod broker;
pub mod channels;
pub mod collaborators;
pub mod config;
pub mod instances;
pub mod intents;
pub mod listeners;
pub mod pending;
pub mod session;

pub use broker::Broker;
pub use config::BrokerConfig;
