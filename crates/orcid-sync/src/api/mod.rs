//! ORCID API access: transport, OAuth2 token, rate limiting and retries.

pub mod client;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod token;
pub mod transport;

pub use client::{join_url, ApiClient};
pub use error::{ApiError, ErrorKind};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use token::{AccessToken, ClientCredentials, TokenManager, TokenSettings, DEFAULT_SCOPE};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
