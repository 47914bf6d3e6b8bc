//! gatelog: a cloud IoT gateway demonstration session with a durable
//! message log.
//!
//! The session provisions a device registry with a gateway and a bound
//! device, records every message delivered to the gateway into an
//! append-only CSV store, publishes state on behalf of the device and
//! removes everything it created.
//!
//! ## Modules
//!
//! * `config`: TOML configuration, validated with `validator`.
//! * `core`: the message store, registry and transport collaborators and
//!   the session state machine.
//! * `logger`: `tracing` initialization: console output (compact, pretty,
//!   JSON) and optional systemd journald.
//!
//! MQTT plumbing lives in the `gatelog-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod logger;
