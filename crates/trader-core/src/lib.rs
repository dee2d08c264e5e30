//! # Trader Core
//!
//! 실시간 스트리밍 클라이언트가 공유하는 핵심 타입을 제공합니다:
//! - 시세 도메인 타입 (`PriceTick`)
//! - 설정 관리 (`AppConfig`, `StreamConfig`)
//! - 로깅 인프라
//! - 공통 에러 타입

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
