use crate::server::ServerError;
use axum::{
    Json as AxumJson,
    extract::FromRequest,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use serde::Serialize;
use std::borrow::Cow;

#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumJson), rejection(ServerError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(json) => (TypedHeader(ContentType::json()), json).into_response(),
            Err(err) => ServerError::JsonResponse(err).into_response(),
        }
    }
}

/// The `{error, message, data}` body every response is wrapped in.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Envelope<T> {
    pub error: bool,
    pub message: Cow<'static, str>,
    pub data: T,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn success(message: &'static str, data: T) -> Self {
        Self {
            error: false,
            message: Cow::Borrowed(message),
            data,
        }
    }
}

impl Envelope<()> {
    #[must_use]
    pub fn failure(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            error: true,
            message: message.into(),
            data: (),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
