//! EU redirect for enrolment clicks
//!
//! Visitors from the EU, the EEA and the UK are sent to a pre-checkout page
//! carrying the required consumer information; everyone else goes straight to
//! the course. When the country cannot be determined the pre-checkout page is
//! used.

use std::time::Duration;

use serde::Deserialize;

use crate::client::Interaction;
use crate::config::GeoConfig;
use crate::error::{Error, Result};

/// EU member states, EEA members and the UK (ISO 3166-1 alpha-2)
pub const EU_COUNTRIES: [&str; 31] = [
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE", // EU
    "IS", "LI", "NO", // EEA
    "GB",
];

/// Case-insensitive membership test.
pub fn is_eu_country(code: &str) -> bool {
    let code = code.trim();
    EU_COUNTRIES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(code))
}

/// Where an enrolment click leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    PreCheckout(String),
    Direct(String),
}

impl RedirectTarget {
    /// Picks the target for a looked-up country; `None` means the lookup failed.
    pub fn for_country(country: Option<&str>, config: &GeoConfig) -> Self {
        match country {
            Some(code) if !is_eu_country(code) => Self::Direct(config.direct_url.clone()),
            _ => Self::PreCheckout(config.pre_checkout_url.clone()),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::PreCheckout(url) | Self::Direct(url) => url,
        }
    }

    pub fn is_eu_visitor(&self) -> bool {
        matches!(self, Self::PreCheckout(_))
    }

    /// The interaction recorded for this decision.
    pub fn interaction(&self) -> Interaction {
        Interaction::EnrollClick {
            eu_visitor: self.is_eu_visitor(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    country_code: Option<String>,
}

/// IP-to-country lookup against a JSON endpoint returning `country_code`
pub struct GeoLookup {
    config: GeoConfig,
    http: reqwest::Client,
}

impl GeoLookup {
    pub fn new(config: &GeoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Geo(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    /// Country code of the calling address.
    pub async fn country_code(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.config.lookup_url)
            .send()
            .await
            .map_err(|e| Error::Geo(format!("lookup request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Geo(format!("lookup returned {status}")));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::Geo(format!("invalid lookup response: {e}")))?;

        body.country_code
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| Error::Geo("lookup response has no country_code".to_string()))
    }

    /// Looks up the visitor and decides the redirect. Never fails.
    pub async fn resolve_enroll_target(&self) -> RedirectTarget {
        match self.country_code().await {
            Ok(code) => {
                tracing::debug!(country = %code, "Resolved visitor country");
                RedirectTarget::for_country(Some(&code), &self.config)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Country lookup failed, using pre-checkout page");
                RedirectTarget::for_country(None, &self.config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use tokio::net::TcpListener;

    async fn lookup_server(body: serde_json::Value) -> String {
        let app = Router::new().route("/json/", get(move || async move { Json(body) }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/json/")
    }

    fn config(lookup_url: String) -> GeoConfig {
        GeoConfig {
            lookup_url,
            direct_url: "https://courses.example/mird".to_string(),
            pre_checkout_url: "pre-checkout.html".to_string(),
            timeout_secs: 2,
        }
    }

    #[test]
    fn test_is_eu_country() {
        assert!(is_eu_country("DE"));
        assert!(is_eu_country("se"));
        assert!(is_eu_country("NO"));
        assert!(is_eu_country("GB"));
        assert!(!is_eu_country("US"));
        assert!(!is_eu_country("CH"));
        assert!(!is_eu_country(""));
    }

    #[test]
    fn test_redirect_target_for_country() {
        let config = config(String::new());

        let eu = RedirectTarget::for_country(Some("FR"), &config);
        assert_eq!(eu, RedirectTarget::PreCheckout("pre-checkout.html".to_string()));
        assert_eq!(
            eu.interaction(),
            Interaction::EnrollClick { eu_visitor: true }
        );

        let direct = RedirectTarget::for_country(Some("US"), &config);
        assert_eq!(direct.url(), "https://courses.example/mird");
        assert!(!direct.is_eu_visitor());

        assert!(RedirectTarget::for_country(None, &config).is_eu_visitor());
    }

    #[tokio::test]
    async fn test_lookup_non_eu_goes_direct() {
        let url = lookup_server(serde_json::json!({"ip": "198.51.100.1", "country_code": "US"})).await;
        let lookup = GeoLookup::new(&config(url)).unwrap();

        assert_eq!(lookup.country_code().await.unwrap(), "US");
        assert_eq!(
            lookup.resolve_enroll_target().await,
            RedirectTarget::Direct("https://courses.example/mird".to_string())
        );
    }

    #[tokio::test]
    async fn test_lookup_without_country_falls_back_to_pre_checkout() {
        let url = lookup_server(serde_json::json!({"error": true, "reason": "RateLimited"})).await;
        let lookup = GeoLookup::new(&config(url)).unwrap();

        assert!(matches!(lookup.country_code().await, Err(Error::Geo(_))));
        assert!(lookup.resolve_enroll_target().await.is_eu_visitor());
    }

    #[tokio::test]
    async fn test_unreachable_lookup_falls_back_to_pre_checkout() {
        let lookup = GeoLookup::new(&config("http://127.0.0.1:9/json/".to_string())).unwrap();
        assert!(lookup.resolve_enroll_target().await.is_eu_visitor());
    }
}
