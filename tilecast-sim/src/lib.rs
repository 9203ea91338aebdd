//! # tilecast-sim: headless pipeline simulator
//!
//! Runs a simulated call on the headless backend: the virtual camera is
//! captured, looped back by a fake engine as remote tiles and rendered
//! into recording graphics contexts. An optional screen share rotates
//! midway to exercise orientation restarts.
//!
//! Tile and capture events are printed to stdout as JSON lines; logs go
//! to stderr.

pub mod config;
pub mod sim;
