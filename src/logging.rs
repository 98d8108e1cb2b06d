use std::io::Write;

use env_logger::{Builder, Env};

/// Initializes the global logger.
///
/// Line format:
///
/// ```text
/// 2024-03-01T06:00:00.123+01:00 INFO     [142]runner.rs           : running at scheduled time
/// ```
///
/// `RUST_LOG` always wins over the default filter, so operators can
/// raise or lower verbosity per module without a restart flag.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };

    Builder::from_env(Env::default().default_filter_or(default_filter))
        .filter_module("hyper_util", log::LevelFilter::Warn)
        .filter_module("rustls", log::LevelFilter::Warn)
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .format(|buf, record| {
            let file = record
                .file()
                .and_then(|f| f.rsplit(['/', '\\']).next())
                .unwrap_or("?");
            writeln!(
                buf,
                "{} {:<8} [{:<3}]{:<20}: {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
                record.level(),
                record.line().unwrap_or(0),
                file,
                record.args()
            )
        })
        .init();
}
