//! Shared, connection-pooled HTTP client construction.
//!
//! One `reqwest::Client` is built per process and cloned (cheaply — it's
//! an `Arc` internally) into every adapter, so concurrent calls to
//! different providers still reuse the same connection pool where the
//! host overlaps.

use std::{sync::OnceLock, time::Duration};

use reqwest::{Client, header::HeaderMap};

pub(crate) fn default_http_client_builder(mut headers: HeaderMap) -> reqwest::ClientBuilder {
    headers.insert(reqwest::header::CONNECTION, "keep-alive".parse().unwrap());

    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// The process-wide default client, used by adapters that don't need any
/// custom default headers of their own (e.g. `ListModels` requests).
pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            default_http_client_builder(HeaderMap::new())
                .build()
                .expect("failed to build default HTTP client")
        })
        .clone()
}
