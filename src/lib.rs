/// OneLight - multi-user smart plug control
///
/// Discovers plugs on the LAN, lets each user claim the ones they own and
/// gates every per-device operation on that ownership.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod controller;
pub mod db;
pub mod device;
pub mod error;
pub mod guard;
pub mod legacy;
pub mod locks;
pub mod metrics;
pub mod models;
pub mod registrar;
pub mod scanner;
pub mod server;
pub mod store;
