//! Bearer credentials for the Home Assistant gateway.
//!
//! Tokens are resolved on every call and never cached, so a rotated supervisor
//! token is picked up without restarting the agent.

/// Environment variables checked for a gateway token, first non-empty wins
pub const TOKEN_SOURCES: [&str; 4] = [
    "SUPERVISOR_TOKEN",
    "HASSIO_TOKEN",
    "HOMEASSISTANT_TOKEN",
    "HA_TOKEN",
];

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Resolves the token from [`TOKEN_SOURCES`] in order.
pub struct EnvTokenProvider<F = fn(&str) -> Option<String>> {
    lookup: F,
}

impl EnvTokenProvider {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> EnvTokenProvider<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F> TokenProvider for EnvTokenProvider<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        TOKEN_SOURCES
            .iter()
            .filter_map(|name| (self.lookup)(name))
            .find(|v| !v.trim().is_empty())
    }
}

/// Fixed token, mostly for tests and one-off tools
#[derive(Debug, Clone)]
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
