pub mod app;
pub mod browser;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod export;
pub mod http;
pub mod output;
pub mod pool;
pub mod providers;
pub mod search;
pub mod tui;
