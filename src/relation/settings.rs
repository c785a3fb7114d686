//! 配置文件加载
//!
//! 从 JSON 配置文件（默认 `appsettings.json`，camelCase 键名）构建
//! [`RelationSyncerConfig`]。环境变量 `RELSYNC_TOKEN` 优先于文件中的 token。

use crate::relation::models::RelationSyncerConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_SETTINGS_PATH: &str = "appsettings.json";

pub const TOKEN_ENV: &str = "RELSYNC_TOKEN";

fn default_api_base_url() -> String {
    "https://api.twitter.com/1.1".to_string()
}

fn default_db_path() -> String {
    "sqlite://relsync.db?mode=rwc".to_string()
}

fn default_page_size() -> u32 {
    5000
}

fn default_delay_ms() -> u64 {
    100
}

fn default_rate_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_delay_ms")]
    pub action_delay_ms: u64,
    #[serde(default = "default_rate_ms")]
    pub rate_poll_interval_ms: u64,
    #[serde(default = "default_rate_ms")]
    pub rate_reset_margin_ms: u64,
}

impl AppSettings {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("解析配置文件失败")
    }

    /// 合并 token 覆盖值并转换为同步器配置
    pub fn into_config(self, token_override: Option<String>) -> Result<RelationSyncerConfig> {
        let token = match token_override.filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                debug!("[Settings] 使用环境变量 {} 中的 token", TOKEN_ENV);
                token
            }
            None => self.token,
        };
        if token.trim().is_empty() {
            anyhow::bail!("缺少 token：请在配置文件中设置 token 或设置环境变量 {}", TOKEN_ENV);
        }
        if self.page_size == 0 {
            anyhow::bail!("pageSize 必须大于 0");
        }

        let mut config = RelationSyncerConfig::new(self.api_base_url, token, self.db_path);
        config.page_size = self.page_size;
        config.page_delay_ms = self.page_delay_ms;
        config.action_delay_ms = self.action_delay_ms;
        config.rate_poll_interval_ms = self.rate_poll_interval_ms;
        config.rate_reset_margin_ms = self.rate_reset_margin_ms;
        Ok(config)
    }
}

/// 读取配置文件并应用环境变量覆盖
pub fn load_config(path: impl AsRef<Path>) -> Result<RelationSyncerConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
    let settings = AppSettings::from_json(&raw)
        .with_context(|| format!("配置文件格式错误: {}", path.display()))?;
    let config = settings.into_config(std::env::var(TOKEN_ENV).ok())?;
    info!(
        "[Settings] 已加载配置: {}，API: {}, 数据库: {}",
        path.display(),
        config.api_base_url,
        config.db_path
    );
    Ok(config)
}

/// 批量传播的目标列表：每行一个用户名，忽略空行和 `#` 注释
pub fn parse_username_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_start_matches('@').to_string())
        .collect()
}

pub fn load_username_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("读取目标列表失败: {}", path.display()))?;
    Ok(parse_username_list(&raw))
}
