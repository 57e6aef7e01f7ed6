use crate::service::{PostService, ServiceError};
use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use derive_where::derive_where;
use json::{Envelope, Json};
use snapfeed_common::model::{
    auth::{AuthTokenDecodeError, AuthTokenHashError},
    post::LikePolicy,
};
use snapfeed_db::{DbError, Store};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod auth;
mod json;
mod routes;

pub type ServerRouter<S> = Router<ServerState<S>>;

#[derive_where(Clone)]
pub struct ServerState<S> {
    pub store: Arc<S>,
    pub posts: Arc<PostService<S>>,
}

impl<S: Store> ServerState<S> {
    #[must_use]
    pub fn new(store: Arc<S>, like_policy: LikePolicy) -> Self {
        let posts = Arc::new(PostService::new(Arc::clone(&store), like_policy));
        Self { store, posts }
    }
}

impl<S> FromRef<ServerState<S>> for Arc<PostService<S>> {
    fn from_ref(state: &ServerState<S>) -> Self {
        Arc::clone(&state.posts)
    }
}

pub fn routes<S: Store>() -> ServerRouter<S> {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidToken => StatusCode::UNAUTHORIZED,
            ServerError::InvalidAuthorizationHeader(_) | ServerError::InvalidAuthToken(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Service(ServiceError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            ServerError::PathRejection(_)
            | ServerError::JsonRejection(_)
            | ServerError::Database(_)
            | ServerError::Service(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::JsonResponse(_) | ServerError::AuthTokenHash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// What the client gets to read. Storage and internal failures stay in
    /// the logs.
    fn public_message(&self) -> String {
        match self {
            ServerError::Database(_)
            | ServerError::Service(ServiceError::Storage(_) | ServiceError::DanglingUser(_)) => {
                "Oops, the request could not be completed.".to_owned()
            }
            ServerError::JsonResponse(_) | ServerError::AuthTokenHash(_) => {
                "Oops, something went wrong on our side.".to_owned()
            }
            ServerError::Service(ServiceError::Validation(err)) => {
                format!("Oops, please fill all the field. {err}")
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        (status, Json(Envelope::failure(self.public_message()))).into_response()
    }
}
