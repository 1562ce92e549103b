/* Logger initialization */
use std::{panic, thread};

use tracing::{error, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;

use crate::CargoEnv;

pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    // option because it can be loaded without this if wanted
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    pub fn init(cargo_env: CargoEnv, sentry_dsn: Option<String>) -> LoggerGuards {
        // relay requests are noisy at debug (one line per segment), so production stays at info
        let max_level = match cargo_env {
            CargoEnv::Development => LevelFilter::DEBUG,
            CargoEnv::Production => LevelFilter::INFO,
        };

        // dev reads the console, production writes a daily file next to the binary
        let (non_blocking, guard) = match cargo_env {
            CargoEnv::Development => tracing_appender::non_blocking(std::io::stdout()),
            CargoEnv::Production => {
                tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "relay.log"))
            }
        };

        // this will just be a none type if it's not in the config
        let sentry_guard = sentry_dsn.map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(environment_name(cargo_env).into()),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(non_blocking);

        let registry = tracing_subscriber::registry()
            .with(max_level)
            .with(fmt_layer);

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unknown");

            let msg = match info.payload().downcast_ref::<&'static str>() {
                Some(s) => *s,
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => &**s,
                    None => "Box<Any>",
                },
            };

            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown location".to_string());

            error!(
                target: "panic", "thread '{}' panicked at '{}': {}\n{:?}",
                thread,
                msg,
                location,
                backtrace::Backtrace::new()
            );
        }));

        // return both guards so they're not dropped
        LoggerGuards {
            _tracing_guard: guard,
            _sentry_guard: sentry_guard,
        }
    }
}

pub fn environment_name(cargo_env: CargoEnv) -> &'static str {
    match cargo_env {
        CargoEnv::Development => "development",
        CargoEnv::Production => "production",
    }
}
