//! Storefront auth gateway
//!
//! Reconciles the storefront's login paths into one session model:
//! password login with legacy credential upgrade, Cognito and Google token
//! logins, and the hosted-UI redirect login with its one-time token claim.
//! Requests are then authenticated by session cookie or bearer token.

pub mod authenticator;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod jwks_fetcher;
pub mod oidc;
pub mod routes;
pub mod state;
pub mod store;

pub use authenticator::{AuthResult, AuthSource};
pub use config::{Config, ConfigError, GatewaySettings};
pub use error::GatewayError;
pub use jwks_fetcher::HttpKeySetFetcher;
pub use oidc::{CognitoOidcClient, OidcError, OidcProvider, OidcTokens, OidcUserInfo};
pub use state::AppState;
pub use store::{
    InMemorySessionStore, InMemoryTokenLedger, InMemoryUserStore, SessionStore, SqliteStore,
    TokenLedger, UserStore,
};
