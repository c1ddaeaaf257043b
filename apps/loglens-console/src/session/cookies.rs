//! Credential cookies held on behalf of the browser.
//!
//! The access and refresh tokens never reach page script: they live in two `HttpOnly`
//! cookies that only this service reads and rewrites. A [`CredentialStore`] is built from
//! the incoming request's `Cookie` header and collects `Set-Cookie` directives for the
//! response, keyed by cookie name so repeated writes collapse to the last one.

use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{
        header::{COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    response::{IntoResponseParts, ResponseParts},
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;
use tracing::warn;

pub const ACCESS_COOKIE_NAME: &str = "loglens_access";
pub const REFRESH_COOKIE_NAME: &str = "loglens_refresh";
pub const ACCESS_COOKIE_MAX_AGE: Duration = Duration::from_secs(60 * 60);
pub const REFRESH_COOKIE_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

// `%` is included so decoding is the exact inverse of encoding.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie {0} produced an invalid header value")]
    InvalidHeader(&'static str),
}

/// Attributes shared by every credential cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
}

/// A full credential set as returned by login, registration, or renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }
}

/// What the browser currently holds. Either cookie may be missing on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl StoredCredentials {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut credentials = Self::default();
        for raw in headers.get_all(COOKIE) {
            let Ok(raw) = raw.to_str() else {
                warn!(target: "loglens::session", "ignoring non-ascii cookie header");
                continue;
            };
            for (name, value) in parse_cookie_pairs(raw) {
                match name {
                    ACCESS_COOKIE_NAME => credentials.access_token = value,
                    REFRESH_COOKIE_NAME => credentials.refresh_token = value,
                    _ => {}
                }
            }
        }
        credentials
    }
}

/// Request-scoped view of the credential cookies plus the rewrites queued for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStore {
    policy: CookiePolicy,
    current: StoredCredentials,
    pending: BTreeMap<&'static str, HeaderValue>,
}

impl CredentialStore {
    pub fn new(current: StoredCredentials, policy: CookiePolicy) -> Self {
        Self {
            policy,
            current,
            pending: BTreeMap::new(),
        }
    }

    pub fn from_headers(headers: &HeaderMap, policy: CookiePolicy) -> Self {
        Self::new(StoredCredentials::from_headers(headers), policy)
    }

    pub fn read(&self) -> StoredCredentials {
        self.current.clone()
    }

    /// Stores `pair`. With `access_only` the refresh cookie (and its expiry) is left alone.
    pub fn write(&mut self, pair: &CredentialPair, access_only: bool) -> Result<(), CookieError> {
        let access = encode_set_cookie(
            ACCESS_COOKIE_NAME,
            &pair.access_token,
            ACCESS_COOKIE_MAX_AGE,
            self.policy,
        )?;
        let refresh = match (&pair.refresh_token, access_only) {
            (Some(token), false) => Some((
                token,
                encode_set_cookie(
                    REFRESH_COOKIE_NAME,
                    token,
                    REFRESH_COOKIE_MAX_AGE,
                    self.policy,
                )?,
            )),
            _ => None,
        };

        self.pending.insert(ACCESS_COOKIE_NAME, access);
        self.current.access_token = non_empty(pair.access_token.clone());
        if let Some((token, header)) = refresh {
            self.pending.insert(REFRESH_COOKIE_NAME, header);
            self.current.refresh_token = non_empty(token.clone());
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), CookieError> {
        for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
            let header = encode_set_cookie(name, "", Duration::ZERO, self.policy)?;
            self.pending.insert(name, header);
        }
        self.current = StoredCredentials::default();
        Ok(())
    }

    pub fn set_cookie_headers(&self) -> impl Iterator<Item = &HeaderValue> {
        self.pending.values()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CredentialStore
where
    CookiePolicy: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers, CookiePolicy::from_ref(state)))
    }
}

impl IntoResponseParts for CredentialStore {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        for value in self.pending.into_values() {
            res.headers_mut().append(SET_COOKIE, value);
        }
        Ok(res)
    }
}

pub fn encode_set_cookie(
    name: &'static str,
    value: &str,
    max_age: Duration,
    policy: CookiePolicy,
) -> Result<HeaderValue, CookieError> {
    let mut cookie = format!(
        "{name}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        utf8_percent_encode(value, COOKIE_VALUE),
        max_age.as_secs()
    );
    if policy.secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|_| CookieError::InvalidHeader(name))
}

fn parse_cookie_pairs(raw: &str) -> impl Iterator<Item = (&str, Option<String>)> {
    raw.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        let decoded = percent_decode_str(value.trim()).decode_utf8().ok()?;
        Some((name.trim(), non_empty(decoded.into_owned())))
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
