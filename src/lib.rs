pub mod api;
pub mod core;
pub mod runtime;

use std::io::Write;

use chrono::Local;

/// 初始化日志，重复调用无副作用
///
/// `level` 取自 `logging.level`（INFO / DEBUG / WARNING ...），`RUST_LOG` 优先。
pub fn init_logging(level: &str) {
    let filter = match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
