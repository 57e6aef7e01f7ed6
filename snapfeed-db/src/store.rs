use snapfeed_common::{
    model::{
        Id, ModelValidationError,
        auth::{AuthTokenHash, Authentication},
        post::{CreateComment, CreatePost, LikePolicy, PostDocument, PostMarker},
        user::{Identity, User, UserMarker},
    },
    snowflake::SnowflakeTimestampFromDateTimeError,
};
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("Could not generate a snowflake: {0}")]
    Snowflake(#[from] SnowflakeTimestampFromDateTimeError),
    #[error("The store has been closed")]
    Closed,
    #[error("The store was poisoned by a panicking writer")]
    Poisoned,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Which posts a listing selects. Listings are always newest first.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum PostFilter {
    All,
    AuthoredBy(Id<UserMarker>),
    AuthoredByAny(Vec<Id<UserMarker>>),
}

impl PostFilter {
    #[must_use]
    pub fn matches(&self, post: &PostDocument) -> bool {
        match self {
            PostFilter::All => true,
            PostFilter::AuthoredBy(author) => post.posted_by == *author,
            PostFilter::AuthoredByAny(authors) => authors.contains(&post.posted_by),
        }
    }
}

/// The document collection backing the post service.
///
/// Every mutation touches a single post and is atomic on its own. Mutations
/// return `Ok(None)` when the post does not exist.
pub trait Store: Send + Sync + 'static {
    fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> impl Future<Output = Result<Option<Authentication>>> + Send;

    fn fetch_identity(
        &self,
        user_id: Id<UserMarker>,
    ) -> impl Future<Output = Result<Option<Identity>>> + Send;

    /// Looks up the public part of the given users. Unknown ids are skipped.
    fn fetch_users(
        &self,
        user_ids: &[Id<UserMarker>],
    ) -> impl Future<Output = Result<Vec<User>>> + Send;

    fn fetch_posts(
        &self,
        filter: &PostFilter,
    ) -> impl Future<Output = Result<Vec<PostDocument>>> + Send;

    fn fetch_post(
        &self,
        post_id: Id<PostMarker>,
    ) -> impl Future<Output = Result<Option<PostDocument>>> + Send;

    fn insert_post(&self, post: &CreatePost) -> impl Future<Output = Result<PostDocument>> + Send;

    fn push_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        policy: LikePolicy,
    ) -> impl Future<Output = Result<Option<PostDocument>>> + Send;

    /// Removes every like of `user_id` from the post.
    fn pull_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> impl Future<Output = Result<Option<PostDocument>>> + Send;

    fn push_comment(
        &self,
        post_id: Id<PostMarker>,
        comment: &CreateComment,
    ) -> impl Future<Output = Result<Option<PostDocument>>> + Send;

    /// Deletes the post with its likes and comments, returning what was
    /// removed.
    fn remove_post(
        &self,
        post_id: Id<PostMarker>,
    ) -> impl Future<Output = Result<Option<PostDocument>>> + Send;
}
