//! Logging setup and the runtime log gate.

/// Log through the `log` facade only while `ENABLE_LOG` is on for `$ctx`.
macro_rules! sus_log {
    ($ctx:expr, $level:ident, $($arg:tt)+) => {
        if $ctx.log_enabled() {
            log::$level!(target: "susfs", $($arg)+);
        }
    };
}

pub(crate) use sus_log;

/// Initialize `env_logger`. `RUST_LOG` overrides the default level.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .try_init();
}
