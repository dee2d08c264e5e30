//! CLI 명령어 구현 모듈.

pub mod config;
pub mod watch;

pub use config::{load_config, show_config};
pub use watch::{format_event, run_watch, WatchConfig};
