//! 설정 로드 및 출력.

use anyhow::{Context, Result};
use trader_core::AppConfig;

/// 설정을 로드하고 검증합니다.
///
/// 경로가 없으면 `config/default.toml`(없어도 됨)과 `TRADER__*` 환경 변수를 사용합니다.
pub fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("설정 파일을 읽을 수 없습니다: {}", path))?,
        None => AppConfig::load_default().context("기본 설정을 읽을 수 없습니다")?,
    };
    config.stream.validate()?;
    Ok(config)
}

/// 유효 설정을 JSON으로 직렬화합니다.
pub fn show_config(config: &AppConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("설정 직렬화 실패")
}
