pub mod api;
pub mod broker;
pub mod config;
pub mod manager;
pub mod protocol;
pub mod pty;
pub mod scrollback;
pub mod session;
pub mod shutdown;
