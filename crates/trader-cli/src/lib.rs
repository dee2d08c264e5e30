//! CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 실시간 스트림 모니터링 (`watch`)
//! - 유효 설정 확인 (`config`)

pub mod commands;

pub use commands::*;
