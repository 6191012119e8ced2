//! Customer batch export: streams the customer table into timestamped XLSX
//! workbooks on a cron schedule or on demand, and serves the results over HTTP.

pub mod config;
pub mod database;
pub mod db_migration;
pub mod domains;
pub mod errors;
pub mod http;

pub use config::Config;

/// Initialise `env_logger`, defaulting `RUST_LOG` to `debug` in debug builds
/// and `info` in release builds. Safe to call more than once.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}
