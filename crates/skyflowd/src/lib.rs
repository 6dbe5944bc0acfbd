//! skyflowd: control plane daemon
//!
//! Loads `skyflow.kdl`, connects provider plugins and runs one sync worker
//! per configured resource kind until shutdown.

pub mod app;
pub mod settings;

pub use app::ControlPlane;
