//! JSON body extractor that reports failures through [`AppError`].
//!
//! axum's `Json` rejects with plain-text bodies and a mix of 400/415/422
//! statuses. `ValidJson` folds every rejection into a `VALIDATION_ERROR`
//! envelope so clients see one error shape.

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::http::error::AppError;

/// Deserialized JSON body; any rejection becomes [`AppError::Validation`].
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}
