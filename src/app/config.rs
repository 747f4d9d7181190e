use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::logsource::UnknownLevelPolicy;

/// 検索ヘルパー設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// ヘルパーのargv（末尾にパターンを追加して起動）。未設定時は組み込みヘルパー
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper: Option<Vec<String>>,
}

/// パイプ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// `shell -c <cmd>` で実行するシェル
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
        }
    }
}

/// フィルタ設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// レベル不明の行を最低レベル扱いにするか最高レベル扱いにするか
    #[serde(default)]
    pub unknown_level: UnknownLevelPolicy,
}

/// セッション保存設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// セッションの保存と復元を行うか
    #[serde(default = "default_session_enabled")]
    pub enabled: bool,
    /// 保存先（未設定時はデータディレクトリ配下）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_session_enabled() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: default_session_enabled(),
            dir: None,
        }
    }
}

/// UI設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// 定期tickの間隔（ミリ秒）。ファイル再スキャンと子プロセスの回収に使う
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// ヒストグラムの初期ズームレベル（0が最も粗い）
    #[serde(default = "default_histogram_zoom")]
    pub histogram_zoom: usize,
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_histogram_zoom() -> usize {
    2
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            histogram_zoom: default_histogram_zoom(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// ログレベル
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipe: PipeConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            search: SearchConfig::default(),
            pipe: PipeConfig::default(),
            filter: FilterConfig::default(),
            session: SessionConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み（存在しない場合はデフォルトを作成して保存）
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            // 初回起動時はデフォルト設定をファイルに保存
            let config = Self::default();
            if let Err(e) = config.save() {
                tracing::warn!("Failed to save default config: {}", e);
            }
            Ok(config)
        }
    }

    /// TOML文字列から読み込み
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// 設定ファイルパスを取得
    pub fn config_path() -> Result<PathBuf> {
        // ~/.config/logscope/config.toml を使用
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/logscope/config.toml"))
    }

    /// 現在の設定をファイルに保存
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    /// 検索ヘルパーのargv（パターンは含まない）
    pub fn helper_argv(&self) -> Vec<String> {
        if let Some(helper) = self.search.helper.as_ref().filter(|h| !h.is_empty()) {
            return helper.clone();
        }
        match std::env::current_exe() {
            Ok(exe) => vec![exe.to_string_lossy().to_string(), "--search-helper".to_string()],
            Err(e) => {
                tracing::warn!("Cannot locate own binary ({}), falling back to grep", e);
                ["grep", "-n", "-E", "-e"].iter().map(|s| s.to_string()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse(
            r#"
log_level = "debug"

[filter]
unknown_level = "highest"
"#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.filter.unknown_level, UnknownLevelPolicy::Highest);
        assert_eq!(config.pipe.shell, "sh");
        assert!(config.session.enabled);
        assert_eq!(config.ui.tick_interval_ms, 1000);
    }

    #[test]
    fn test_default_round_trips() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.ui.histogram_zoom, 2);
        assert!(config.search.helper.is_none());
    }

    #[test]
    fn test_configured_helper_wins() {
        let mut config = Config::default();
        config.search.helper = Some(vec!["grep".into(), "-n".into(), "-e".into()]);
        assert_eq!(config.helper_argv(), vec!["grep", "-n", "-e"]);
    }

    #[test]
    fn test_bad_config_is_error() {
        assert!(Config::parse("log_level = [").is_err());
    }
}
