use crate::server::{ServerError, ServerState};
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use snapfeed_common::model::{auth::AuthToken, user::Identity};
use snapfeed_db::Store;
use time::OffsetDateTime;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// Resolves the bearer token of a request to the acting user. Handlers taking
/// this extractor never run for unauthenticated requests.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser(pub Identity);

impl<S: Store> FromRequestParts<ServerState<S>> for AuthenticatedUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState<S>,
    ) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let token_hash = request_token.hash()?;

        let authentication = state
            .store
            .fetch_authentication(&token_hash)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if authentication.user != request_token.user_id
            || authentication.is_expired_at(OffsetDateTime::now_utc())
        {
            return Err(ServerError::InvalidToken);
        }

        let identity = state
            .store
            .fetch_identity(authentication.user)
            .await?
            .ok_or(ServerError::InvalidToken)?;
        debug!(user_id = %identity.id(), "Authenticated request");

        Ok(Self(identity))
    }
}
