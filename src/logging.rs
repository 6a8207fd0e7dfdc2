//! 日志初始化

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

pub type LoggingError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 控制台日志
///
/// `RUST_LOG` 存在时优先于 `level`。重复初始化返回错误，不会 panic。
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .try_init()
}
