use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: skyflow.kdl\n\
        - ./.skyflow/ ディレクトリ\n\
        - ~/.config/skyflow/skyflow.kdl\n\
        または SKYFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {path}\n理由: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("無効な期間指定 '{0}' (例: 500ms, 30s, 5m, 1h)")]
    InvalidDuration(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
