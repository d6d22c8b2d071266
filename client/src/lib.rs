//! Headless synchronization controller for the room editor: keeps the
//! backend's floorplan row in step with the in-memory scene, caches device
//! records for the selection bubble, and drives both from one periodic tick.
//! The 3D engine itself stays behind [`engine::SceneView`].

pub mod api;
pub mod engine;
pub mod events;
pub mod scene;
pub mod sync;
