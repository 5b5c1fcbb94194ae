pub mod api;
pub mod camera;
pub mod config;
pub mod hub;
pub mod ipc;
pub mod protocol;
pub mod router;
pub mod storage;
