//! Outbound identity generation
//!
//! Every attempt gets a freshly drawn header set so consecutive retries do
//! not present the same fingerprint.

use std::collections::BTreeMap;

use crate::domain::RequestIdentity;

/// Source of per-attempt identities
pub trait IdentitySupplier: Send + Sync {
    fn next_identity(&self) -> RequestIdentity;
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-IN,en;q=0.9,hi;q=0.8",
    "en-US,en;q=0.8,de;q=0.6",
];

const ACCEPTS: &[&str] = &[
    "application/json, text/plain, */*",
    "application/json,text/html;q=0.9,*/*;q=0.8",
    "*/*",
];

/// Draws user agent and header variants uniformly at random
#[derive(Debug, Default, Clone)]
pub struct RandomIdentitySupplier {
    extra_headers: BTreeMap<String, String>,
}

impl RandomIdentitySupplier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Static headers added to every identity (e.g. a site's `Referer`)
    #[must_use]
    pub fn with_headers(extra_headers: BTreeMap<String, String>) -> Self {
        Self { extra_headers }
    }
}

fn pick<'a>(choices: &[&'a str]) -> &'a str {
    choices[fastrand::usize(..choices.len())]
}

impl IdentitySupplier for RandomIdentitySupplier {
    fn next_identity(&self) -> RequestIdentity {
        let user_agent = pick(USER_AGENTS).to_string();
        let mut headers = self.extra_headers.clone();
        headers.insert("Accept".into(), pick(ACCEPTS).into());
        headers.insert("Accept-Language".into(), pick(ACCEPT_LANGUAGES).into());
        headers.insert("Cache-Control".into(), "no-cache".into());
        if fastrand::bool() {
            headers.insert("DNT".into(), "1".into());
        }
        RequestIdentity { headers, user_agent }
    }
}

/// Always returns the same identity
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct FixedIdentitySupplier(pub RequestIdentity);

#[cfg(test)]
impl IdentitySupplier for FixedIdentitySupplier {
    fn next_identity(&self) -> RequestIdentity {
        self.0.clone()
    }
}
