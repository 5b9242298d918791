//! A pipeline cache for Maxwell shader programs compiled with [mxw_shader].
//!
//! # Getting Started
//! The [PipelineCache] finds or builds the host pipeline for the current register state.
//! Programs are read from guest memory through [GuestMemory](environment::GuestMemory)
//! and linked by an implementation of the host [Device](device::Device).
//!
//! ```rust no_run
//! # use std::sync::Arc;
//! # use mxw_pipeline::device::Device;
//! # use mxw_pipeline::environment::GuestMemory;
//! # use mxw_pipeline::state::GraphicsState;
//! # use mxw_pipeline::workers::StopToken;
//! # use mxw_pipeline::{PipelineCache, PipelineCacheConfig};
//! # fn draw<D: Device>(device: Arc<D>, memory: Arc<dyn GuestMemory>, state: &GraphicsState) -> Result<(), Box<dyn std::error::Error>> {
//! let mut cache = PipelineCache::new(device, memory, PipelineCacheConfig::default())?;
//! cache.load_disk_resources(0x0100000000010000, &StopToken::new(), |stage, built, total| {
//!     println!("{stage:?} {built}/{total}");
//! })?;
//! if let Some(pipeline) = cache.current_graphics_pipeline(state) {
//!     println!("{} stages", pipeline.stages.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! Pipelines are keyed by the content hashes of their programs rather than addresses.
//! Every pipeline built while running is recorded to disk with the environment values it read,
//! so later runs can rebuild the same pipelines on worker threads before they are first used.
pub mod cache;
pub mod config;
pub mod device;
pub mod environment;
pub mod error;
pub mod gpu_thread;
pub mod layout;
pub mod pipeline;
pub mod state;
pub mod workers;

pub use cache::{LoadStage, PipelineCache};
pub use config::PipelineCacheConfig;
