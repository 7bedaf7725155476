//! `milightd` is a control daemon for Mi-Light RGB fixtures. It keeps a
//! single UDP session to the bridge alive, funnels light commands through a
//! bounded queue, plays back stored sequences and exposes the whole thing
//! over a small HTTP API.

#[macro_use]
extern crate tracing;

pub mod connection;
pub mod controller;
pub mod milight;
pub mod models;
pub mod sequencer;
pub mod server;
pub mod store;
