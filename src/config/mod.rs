mod settings;

pub use settings::{
    DEFAULT_SOURCE_URL, DEFAULT_TELEGRAM_API, ENV_PREFIX, FormattingOptions, LogConfig, Settings,
    SourceConfig, Target, TelegramConfig, apply_env_overrides, load_from_file, load_settings,
};
