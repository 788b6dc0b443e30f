//! Performance counter sampling pipeline.
//!
//! A [`supervisor::Supervisor`] drives an external sampler into a raw
//! capture file, [`capture::parse`] turns that file into per-metric series,
//! and [`export::Exporter`] writes each series as its own tabular file.

pub mod capture;
pub mod config;
pub mod export;
pub mod pipeline;
pub mod supervisor;
