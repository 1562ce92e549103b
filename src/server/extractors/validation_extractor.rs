use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use tracing::debug;
use validator::Validate;

use crate::server::error::Error;

/// query string that has to pass its `validator` rules before a handler sees it
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::try_from_uri(&parts.uri).map_err(|e| {
            debug!("rejected query string: {}", e);
            Error::BadRequest(e.body_text())
        })?;

        value.validate().map_err(|e| {
            debug!("query failed validation: {}", e);
            Error::BadRequest(e.to_string().replace('\n', ", "))
        })?;

        Ok(ValidatedQuery(value))
    }
}
