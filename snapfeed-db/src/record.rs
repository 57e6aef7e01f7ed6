use snapfeed_common::model::{
    Id, ModelValidationError,
    auth::Authentication,
    post::{CommentDocument, PostContent, PostDocument},
    user::{User, UserName},
};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

pub(crate) fn to_db_id<Marker>(id: Id<Marker>) -> i64 {
    id.snowflake().get().cast_signed()
}

pub(crate) fn from_db_id<Marker>(snowflake: i64) -> Id<Marker> {
    snowflake.cast_unsigned().into()
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub title: String,
    pub body: String,
    pub photo: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct LikeRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub text: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: from_db_id(value.user_snowflake),
            name: UserName::new(value.name)?,
        })
    }
}

impl From<PostRecord> for PostDocument {
    fn from(value: PostRecord) -> Self {
        Self {
            id: from_db_id(value.post_snowflake),
            content: PostContent {
                title: value.title,
                body: value.body,
                photo: value.photo,
            },
            posted_by: from_db_id(value.user_snowflake),
            likes: Vec::new(),
            comments: Vec::new(),
            created_at: value.created_at,
        }
    }
}

impl From<CommentRecord> for CommentDocument {
    fn from(value: CommentRecord) -> Self {
        Self {
            id: from_db_id(value.comment_snowflake),
            text: value.text,
            posted_by: from_db_id(value.user_snowflake),
            created_at: value.created_at,
        }
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: from_db_id(value.user_snowflake),
            token_hash: value.token_hash.into_boxed_slice().try_into()?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}
