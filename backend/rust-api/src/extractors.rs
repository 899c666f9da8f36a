use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use validator::Validate;

/// JSON body extractor that rejects with the API's JSON error shape and runs
/// the payload's `validator` rules before the handler sees it.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => value,
            Err(rejection) => {
                return Err(reject(format!(
                    "Failed to parse JSON request body: {}",
                    rejection
                )))
            }
        };
        value
            .validate()
            .map_err(|errors| reject(errors.to_string()))?;
        Ok(AppJson(value))
    }
}

fn reject(message: String) -> Response {
    tracing::warn!("{}", message);
    let error_response = json!({
        "message": message,
        "status": 400,
        "code": "validation_error",
    });
    (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
}
