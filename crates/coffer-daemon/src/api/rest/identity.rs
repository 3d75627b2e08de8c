//! Caller identity extraction.
//!
//! An upstream proxy authenticates the caller and forwards its public key in
//! a header. A missing or empty header yields the anonymous identity; the
//! engine decides what anonymous callers may do.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use coffer_core::Identity;
use std::convert::Infallible;

pub const IDENTITY_HEADER: &str = "x-coffer-identity";

#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let pubkey = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        Ok(Self(Identity::new(pubkey)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Identity {
        let (mut parts, _) = request.into_parts();
        CallerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn reads_trimmed_header() {
        let request = Request::builder()
            .header(IDENTITY_HEADER, " 02abc ")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await, Identity::new("02abc"));
    }

    #[tokio::test]
    async fn missing_header_is_anonymous() {
        let request = Request::builder().body(()).unwrap();
        assert!(extract(request).await.is_anonymous());
    }
}
