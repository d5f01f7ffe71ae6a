pub mod app;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod event;
pub mod markdown;
pub mod session;
pub mod theme;
