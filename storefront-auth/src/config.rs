//! Gateway configuration

use std::collections::HashMap;
use std::fmt;

use chrono::Duration;
use rand::RngCore;
use sha2::{Digest, Sha512};
use thiserror::Error;
use tower_cookies::cookie::SameSite;
use tower_cookies::Key;
use url::Url;

use crate::crypto::BCRYPT_COST;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("no allow-listed redirect URI shares the frontend origin {0}")]
    FrontendNotAllowListed(String),

    #[error("incomplete configuration: {0}")]
    Incomplete(String),
}

/// Cognito user pool, app client and hosted UI
#[derive(Clone)]
pub struct CognitoConfig {
    pub region: String,
    pub user_pool_id: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Hosted UI domain; the redirect login is unavailable without it
    pub domain: Option<String>,
}

impl fmt::Debug for CognitoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitoConfig")
            .field("region", &self.region)
            .field("user_pool_id", &self.user_pool_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub secret: Option<String>,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub same_site: SameSite,
    pub max_age_secs: i64,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("cookie_name", &self.cookie_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_secure", &self.cookie_secure)
            .field("same_site", &self.same_site)
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Origin of the storefront SPA, target of every redirect
    pub frontend_origin: String,

    /// Exact-match allow-list for OIDC redirect URIs
    pub allowed_redirect_uris: Vec<String>,

    /// Refuse to start unless an allow-listed URI is on the frontend origin
    pub require_frontend_redirect: bool,

    /// Treat missing identity-provider settings as fatal
    pub strict: bool,

    pub cognito: Option<CognitoConfig>,

    /// Audience for Google Sign-In tokens
    pub google_client_id: Option<String>,

    pub session: SessionConfig,

    pub temp_token_ttl_secs: i64,
    pub claim_grace_secs: i64,
    pub bcrypt_cost: u32,

    /// SQLite database file; in-memory stores when unset
    pub database_path: Option<String>,

    /// Names of Cognito variables that were set while others were missing
    partial_cognito: Vec<&'static str>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            frontend_origin: "http://localhost:5173".to_string(),
            allowed_redirect_uris: Vec::new(),
            require_frontend_redirect: false,
            strict: false,
            cognito: None,
            google_client_id: None,
            session: SessionConfig {
                secret: None,
                cookie_name: "storefront_session".to_string(),
                cookie_domain: None,
                cookie_secure: false,
                same_site: SameSite::Lax,
                max_age_secs: 86_400,
            },
            temp_token_ttl_secs: 300,
            claim_grace_secs: 30,
            bcrypt_cost: BCRYPT_COST,
            database_path: None,
            partial_cognito: Vec::new(),
        }
    }
}

const COGNITO_REQUIRED: [&str; 3] = ["COGNITO_REGION", "COGNITO_USER_POOL_ID", "COGNITO_CLIENT_ID"];

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from a fixed set of variables
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let region = get("COGNITO_REGION");
        let pool = get("COGNITO_USER_POOL_ID");
        let client = get("COGNITO_CLIENT_ID");
        let partial_cognito: Vec<&'static str> = COGNITO_REQUIRED
            .iter()
            .zip([&region, &pool, &client])
            .filter(|(_, value)| value.is_some())
            .map(|(name, _)| *name)
            .collect();

        let cognito = match (region, pool, client) {
            (Some(region), Some(user_pool_id), Some(client_id)) => Some(CognitoConfig {
                region,
                user_pool_id,
                client_id,
                client_secret: get("COGNITO_CLIENT_SECRET"),
                domain: get("COGNITO_DOMAIN"),
            }),
            _ => None,
        };

        let same_site = match get("SESSION_COOKIE_SAME_SITE").as_deref() {
            None => defaults.session.same_site,
            Some(v) => parse_same_site(v).ok_or_else(|| ConfigError::InvalidValue {
                name: "SESSION_COOKIE_SAME_SITE",
                value: v.to_string(),
            })?,
        };

        Ok(Self {
            port: parse_or("PORT", get("PORT"), defaults.port)?,
            frontend_origin: get("AUTH_FRONTEND_ORIGIN")
                .map(|o| o.trim_end_matches('/').to_string())
                .unwrap_or(defaults.frontend_origin),
            allowed_redirect_uris: get("AUTH_ALLOWED_REDIRECT_URIS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            require_frontend_redirect: parse_bool(
                "AUTH_REQUIRE_FRONTEND_REDIRECT",
                get("AUTH_REQUIRE_FRONTEND_REDIRECT"),
            )?,
            strict: parse_bool("AUTH_STRICT_CONFIG", get("AUTH_STRICT_CONFIG"))?,
            partial_cognito: if cognito.is_some() { Vec::new() } else { partial_cognito },
            cognito,
            google_client_id: get("GOOGLE_CLIENT_ID"),
            session: SessionConfig {
                secret: get("SESSION_SECRET"),
                cookie_name: get("SESSION_COOKIE_NAME").unwrap_or(defaults.session.cookie_name),
                cookie_domain: get("SESSION_COOKIE_DOMAIN"),
                cookie_secure: parse_bool("SESSION_COOKIE_SECURE", get("SESSION_COOKIE_SECURE"))?,
                same_site,
                max_age_secs: parse_or(
                    "SESSION_MAX_AGE_SECS",
                    get("SESSION_MAX_AGE_SECS"),
                    defaults.session.max_age_secs,
                )?,
            },
            temp_token_ttl_secs: parse_or(
                "AUTH_TEMP_TOKEN_TTL_SECS",
                get("AUTH_TEMP_TOKEN_TTL_SECS"),
                defaults.temp_token_ttl_secs,
            )?,
            claim_grace_secs: parse_or(
                "AUTH_CLAIM_GRACE_SECS",
                get("AUTH_CLAIM_GRACE_SECS"),
                defaults.claim_grace_secs,
            )?,
            bcrypt_cost: parse_or("BCRYPT_COST", get("BCRYPT_COST"), defaults.bcrypt_cost)?,
            database_path: get("DATABASE_PATH"),
        })
    }

    /// Check the configuration for gaps
    ///
    /// Returns the problems to log as warnings. Malformed values, and any
    /// problem at all in strict mode, are errors.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let frontend = Url::parse(&self.frontend_origin).map_err(|_| ConfigError::InvalidValue {
            name: "AUTH_FRONTEND_ORIGIN",
            value: self.frontend_origin.clone(),
        })?;

        for uri in &self.allowed_redirect_uris {
            Url::parse(uri).map_err(|_| ConfigError::InvalidValue {
                name: "AUTH_ALLOWED_REDIRECT_URIS",
                value: uri.clone(),
            })?;
        }

        if self.require_frontend_redirect {
            let on_frontend = self
                .allowed_redirect_uris
                .iter()
                .filter_map(|u| Url::parse(u).ok())
                .any(|u| u.origin() == frontend.origin());
            if !on_frontend {
                return Err(ConfigError::FrontendNotAllowListed(self.frontend_origin.clone()));
            }
        }

        check_seconds("SESSION_MAX_AGE_SECS", self.session.max_age_secs, MAX_SESSION_AGE_SECS)?;
        check_seconds("AUTH_TEMP_TOKEN_TTL_SECS", self.temp_token_ttl_secs, MAX_TEMP_TOKEN_TTL_SECS)?;
        check_seconds("AUTH_CLAIM_GRACE_SECS", self.claim_grace_secs, self.temp_token_ttl_secs)?;

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "BCRYPT_COST",
                value: self.bcrypt_cost.to_string(),
            });
        }

        let mut problems = Vec::new();
        match &self.cognito {
            None if !self.partial_cognito.is_empty() => problems.push(format!(
                "Cognito partially configured (set: {}); all of {} are required",
                self.partial_cognito.join(", "),
                COGNITO_REQUIRED.join(", ")
            )),
            None => problems.push(format!(
                "Cognito not configured ({}); token and redirect login disabled",
                COGNITO_REQUIRED.join(", ")
            )),
            Some(c) if c.domain.is_none() => {
                problems.push("COGNITO_DOMAIN not set; redirect login disabled".to_string())
            }
            Some(_) => {}
        }
        if self.allowed_redirect_uris.is_empty() {
            problems.push(
                "AUTH_ALLOWED_REDIRECT_URIS is empty; every redirect login will be refused"
                    .to_string(),
            );
        }
        if self.session.secret.is_none() {
            problems.push(
                "SESSION_SECRET not set; sessions will not survive a restart".to_string(),
            );
        }

        if self.strict && !problems.is_empty() {
            return Err(ConfigError::Incomplete(problems.join("; ")));
        }
        Ok(problems)
    }

    /// Key used to sign session cookies
    pub fn cookie_key(&self) -> Key {
        match &self.session.secret {
            Some(secret) => Key::from(Sha512::digest(secret.as_bytes()).as_slice()),
            None => {
                let mut bytes = [0u8; 64];
                rand::thread_rng().fill_bytes(&mut bytes);
                Key::from(&bytes[..])
            }
        }
    }

    /// Runtime settings; durations out of range fall back to the defaults
    pub fn settings(&self) -> GatewaySettings {
        let defaults = Config::default();
        let seconds = |value: i64, fallback: i64| {
            Duration::try_seconds(value).unwrap_or_else(|| Duration::seconds(fallback))
        };
        GatewaySettings {
            frontend_origin: self.frontend_origin.clone(),
            allowed_redirect_uris: self.allowed_redirect_uris.clone(),
            cookie: CookieSettings {
                name: self.session.cookie_name.clone(),
                domain: self.session.cookie_domain.clone(),
                secure: self.session.cookie_secure,
                same_site: self.session.same_site,
                max_age: seconds(self.session.max_age_secs, defaults.session.max_age_secs),
            },
            temp_token_ttl: seconds(self.temp_token_ttl_secs, defaults.temp_token_ttl_secs),
            claim_grace: seconds(self.claim_grace_secs, defaults.claim_grace_secs),
            bcrypt_cost: self.bcrypt_cost,
        }
    }
}

/// Attributes shared by every session cookie the gateway sets or clears
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
    /// Sliding inactivity window
    pub max_age: Duration,
}

/// Runtime settings the request handlers read
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub frontend_origin: String,
    pub allowed_redirect_uris: Vec<String>,
    pub cookie: CookieSettings,
    pub temp_token_ttl: Duration,
    pub claim_grace: Duration,
    pub bcrypt_cost: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl GatewaySettings {
    /// Absolute URL on the frontend with an encoded query
    pub fn frontend_url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let base = format!("{}{}", self.frontend_origin.trim_end_matches('/'), path);
        if query.is_empty() {
            return base;
        }
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        format!("{}?{}", base, encoded)
    }
}

fn parse_same_site(value: &str) -> Option<SameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(SameSite::Strict),
        "lax" => Some(SameSite::Lax),
        "none" => Some(SameSite::None),
        _ => None,
    }
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::InvalidValue {
            name,
            value: value.unwrap_or_default(),
        }),
    }
}

/// Longest sliding session window accepted
const MAX_SESSION_AGE_SECS: i64 = 365 * 86_400;
/// Longest temp token lifetime accepted
const MAX_TEMP_TOKEN_TTL_SECS: i64 = 86_400;

/// Durations must be positive and no longer than `max`
fn check_seconds(name: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if value <= 0 || value > max {
        return Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: v }),
    }
}
