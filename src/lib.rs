//! `ScareBox` - jump-scare installation controller
//!
//! Listens for a trigger tone, runs a timed countdown, scare and reset
//! sequence that drives lights and audio, and streams state and telemetry
//! to live subscribers.

pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod hub;
pub mod observability;
pub mod observer;
pub mod sequence;
