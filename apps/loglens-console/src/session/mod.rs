pub mod backend;
pub mod cookies;
pub mod executor;

pub use backend::{BackendClient, BackendError, FormPart, ProxyBody, ProxyRequest};
pub use cookies::{
    CookieError, CookiePolicy, CredentialPair, CredentialStore, StoredCredentials,
    ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME,
};
pub use executor::{
    Execution, ExecutionOutcome, SessionExecutor, SessionMutation, DEFAULT_PROXY_TIMEOUT,
};
