//! 실시간 시세 데이터 타입.
//!
//! 스트림에서 정규화된 가격 업데이트 페이로드
//! (`symbol`, `price`, `change`, `changePercent`, `timestamp`)의 타입 뷰입니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 실시간 가격 틱.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    /// 거래 심볼
    pub symbol: String,
    /// 현재가
    pub price: Decimal,
    /// 전일 대비 변동
    #[serde(default)]
    pub change: Decimal,
    /// 전일 대비 변동률(%)
    #[serde(default)]
    pub change_percent: Decimal,
    /// 서버 타임스탬프 (밀리초)
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriceTick {
    /// JSON 페이로드에서 가격 틱을 추출합니다.
    ///
    /// 필수 필드(`symbol`, `price`)가 없으면 `None`을 반환합니다.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// 변동 이전 가격을 반환합니다.
    pub fn previous_price(&self) -> Decimal {
        self.price - self.change
    }

    /// 상승 틱인지 확인합니다.
    pub fn is_up(&self) -> bool {
        self.change > Decimal::ZERO
    }

    /// 하락 틱인지 확인합니다.
    pub fn is_down(&self) -> bool {
        self.change < Decimal::ZERO
    }
}
