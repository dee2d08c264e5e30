//! 실시간 스트림 도메인 모델.

mod market_data;

pub use market_data::*;
