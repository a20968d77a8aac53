//! Tracing setup.
//!
//! The subscriber is installed before the config is read so loading it is
//! logged as well. Once the config is known, `[logging] level` replaces the
//! startup filter unless `RUST_LOG` was given.

use tracing::{warn, Subscriber};
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, reload, EnvFilter, Registry};

use borgtide_core::config::LoggingConfig;

const STARTUP_LEVEL: &str = "info";

pub(crate) struct Logging {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl Logging {
    pub fn init() -> Self {
        let (filter, from_env) = match EnvFilter::try_from_default_env() {
            Ok(filter) => (filter, true),
            Err(_) => (EnvFilter::new(STARTUP_LEVEL), false),
        };
        let (subscriber, filter) = subscriber(filter, std::io::stdout);
        subscriber.init();
        Self { filter, from_env }
    }

    /// Switch to the configured level. `RUST_LOG` keeps precedence.
    pub fn apply(&self, logging: &LoggingConfig) {
        if self.from_env {
            return;
        }
        if let Err(e) = self.filter.reload(EnvFilter::new(&logging.level)) {
            warn!(error = %e, level = %logging.level, "configured log level not applied");
        }
    }
}

fn subscriber<W>(
    filter: EnvFilter,
    writer: W,
) -> (
    impl Subscriber + Send + Sync + 'static,
    reload::Handle<EnvFilter, Registry>,
)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer));
    (subscriber, handle)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::info;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn events_before_config_are_kept_then_config_level_applies() {
        let out = Captured::default();
        let (subscriber, filter) = subscriber(EnvFilter::new(STARTUP_LEVEL), out.clone());
        let logging = Logging {
            filter,
            from_env: false,
        };

        tracing::subscriber::with_default(subscriber, || {
            info!("configuration loaded");
            logging.apply(&LoggingConfig {
                level: "warn".into(),
            });
            info!("quiet after reload");
            warn!("loud after reload");
        });

        let text = out.text();
        assert!(text.contains("configuration loaded"));
        assert!(!text.contains("quiet after reload"));
        assert!(text.contains("loud after reload"));
    }

    #[test]
    fn rust_log_wins_over_config() {
        let out = Captured::default();
        let (subscriber, filter) = subscriber(EnvFilter::new("debug"), out.clone());
        let logging = Logging {
            filter,
            from_env: true,
        };

        tracing::subscriber::with_default(subscriber, || {
            logging.apply(&LoggingConfig {
                level: "error".into(),
            });
            info!("still verbose");
        });

        assert!(out.text().contains("still verbose"));
    }
}
