//! Read-only information about the host site, used for sender defaults.

use serde::Deserialize;

/// Site lookups consulted when a message carries no sender.
pub trait SiteInfo: Send + Sync {
    /// Administrator address.
    fn admin_email(&self) -> Option<String>;

    /// Human-readable site name.
    fn site_name(&self) -> Option<String>;

    /// Public home URL, e.g. `https://www.example.com/`.
    fn home_url(&self) -> Option<String>;
}

/// Fixed site information, typically loaded from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticSiteInfo {
    /// Administrator address.
    #[serde(default)]
    pub admin_email: Option<String>,
    /// Site name.
    #[serde(default)]
    pub name: Option<String>,
    /// Home URL.
    #[serde(default)]
    pub home_url: Option<String>,
}

impl StaticSiteInfo {
    /// Creates site information with an admin address and a name.
    pub fn new(admin_email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            admin_email: Some(admin_email.into()),
            name: Some(name.into()),
            home_url: None,
        }
    }

    /// Sets the home URL.
    pub fn with_home_url(mut self, url: impl Into<String>) -> Self {
        self.home_url = Some(url.into());
        self
    }
}

impl SiteInfo for StaticSiteInfo {
    fn admin_email(&self) -> Option<String> {
        self.admin_email.clone()
    }

    fn site_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn home_url(&self) -> Option<String> {
        self.home_url.clone()
    }
}

/// Returns the host of `home_url`, lower-cased and without a leading `www.`.
pub fn site_domain(home_url: &str) -> Option<String> {
    let parsed = url::Url::parse(home_url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
