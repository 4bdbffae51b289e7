//! HTTP client helpers.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::Result;

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build a JSON client with a request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("farm-notify/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
