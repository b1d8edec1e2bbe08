//! PPE Monitor Client Library
//!
//! Real-time personal protective equipment monitoring: camera frames are
//! sampled, sent to a remote detection service, and the results are merged
//! with server-pushed updates into one process-wide view state.
//!
//! ## Architecture
//!
//! 1. Geometry - box mapping between working and display resolution
//! 2. FrameSource - platform frame acquisition (black box)
//! 3. AiClient - inference service adapter
//! 4. Overlay - box/label composition and rasterisation
//! 5. CameraPipeline - per-camera infer and render loops, plus the manager
//! 6. PushChannel - server push client with fixed-delay reconnect
//! 7. AggregateStore - merged view state, bounded alert history
//! 8. CameraRegistry - camera discovery and change stream
//! 9. WebAPI - read-only view endpoints
//!
//! ## Design Principles
//!
//! - Single writer per store field; readers take snapshots
//! - Failures stay inside the pipeline or channel that hit them

pub mod ai_client;
pub mod camera_pipeline;
pub mod camera_registry;
pub mod error;
pub mod frame_source;
pub mod geometry;
pub mod models;
pub mod overlay;
pub mod push_channel;
pub mod state;
pub mod store;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
