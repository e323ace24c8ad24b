//! Log routing for the injected module.
//!
//! On Android, `tracing` events fall through to the `log` facade and end up
//! in logcat under [`LOG_TAG`]. Elsewhere a `tracing-subscriber` formatter is
//! installed so the module can be exercised in host tests.

/// Logcat tag.
pub const LOG_TAG: &str = "frame-probe";

/// Installs the logger once per process. Later calls are no-ops.
pub fn init() {
    #[cfg(target_os = "android")]
    {
        use android_logger::Config;
        use log::LevelFilter;

        android_logger::init_once(
            Config::default()
                .with_max_level(LevelFilter::Info)
                .with_tag(LOG_TAG),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => match tracing_subscriber::EnvFilter::try_new(
                "error,frame_probe_core=info,frame_probe_zygisk=info",
            ) {
                Ok(filter) => filter,
                Err(_) => tracing_subscriber::EnvFilter::new("error"),
            },
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }
}
