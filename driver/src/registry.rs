use crate::Database;
use selekt_core::{Error, Result};
use std::sync::Once;

static REGISTER: Once = Once::new();

/// Registers the driver. A one-time process-wide effect: it warms the logging
/// backend and announces the driver version. Safe to call repeatedly.
pub fn register() {
    REGISTER.call_once(|| {
        logger::Logger::set_log_level("info".to_string());
        log::info!(
            "{} driver {} registered",
            constants::VENDOR_IDENTIFIER,
            env!("CARGO_PKG_VERSION")
        );
    });
}

/// True when this driver understands the URL's prefix.
pub fn accepts_url(url: &str) -> bool {
    url.starts_with("jdbc:selekt:") || url.starts_with("jdbc:sqlite:")
}

/// DriverManager-style entry point: registers the driver, then opens the
/// database the URL names.
pub fn connect(url: &str) -> Result<Database> {
    register();
    if !accepts_url(url) {
        return Err(Error::InvalidUriFormat(format!(
            "'{url}' is not a {} JDBC URL",
            constants::VENDOR_IDENTIFIER
        )));
    }
    Database::open(url)
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn url_acceptance() {
        assert!(accepts_url("jdbc:selekt:/tmp/db"));
        assert!(accepts_url("jdbc:sqlite:/tmp/db"));
        assert!(!accepts_url("jdbc:postgresql://localhost/db"));
        assert!(!accepts_url("/tmp/db"));
    }

    #[test]
    fn rejected_urls_are_typed() {
        let denied = connect("jdbc:postgresql://localhost/db");
        assert!(matches!(denied, Err(Error::InvalidUriFormat(_))));
    }

    #[test]
    fn register_is_idempotent() {
        register();
        register();
    }
}
