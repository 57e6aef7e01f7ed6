use crate::model::{
    Id,
    user::{User, UserMarker},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// A post as it is stored, referring to users by id only.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PostDocument {
    pub id: Id<PostMarker>,
    pub content: PostContent,
    pub posted_by: Id<UserMarker>,
    pub likes: Vec<Id<UserMarker>>,
    pub comments: Vec<CommentDocument>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CommentDocument {
    pub id: Id<CommentMarker>,
    pub text: String,
    pub posted_by: Id<UserMarker>,
    pub created_at: OffsetDateTime,
}

impl PostDocument {
    /// Every user this post needs resolved: the author and all commenters.
    pub fn referenced_users(&self) -> impl Iterator<Item = Id<UserMarker>> + '_ {
        std::iter::once(self.posted_by).chain(self.comments.iter().map(|comment| comment.posted_by))
    }
}

/// A post with its author and every comment author resolved.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id<PostMarker>,
    #[serde(flatten)]
    pub content: PostContent,
    pub posted_by: User,
    pub likes: Vec<Id<UserMarker>>,
    pub comments: Vec<Comment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub text: String,
    pub posted_by: User,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The user supplied part of a post. Absent fields deserialize as empty and
/// are rejected by [`PostContent::validate`].
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct PostContent {
    pub title: String,
    pub body: String,
    pub photo: String,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Field {0:?} is required and must not be empty")]
pub struct EmptyFieldError(pub &'static str);

impl PostContent {
    pub fn validate(&self) -> Result<(), EmptyFieldError> {
        for (field, value) in [
            ("title", &self.title),
            ("body", &self.body),
            ("photo", &self.photo),
        ] {
            require_text(field, value)?;
        }

        Ok(())
    }
}

/// Rejects only the empty string. Whitespace counts as content.
pub fn require_text(field: &'static str, value: &str) -> Result<(), EmptyFieldError> {
    if value.is_empty() {
        Err(EmptyFieldError(field))
    } else {
        Ok(())
    }
}

/// How repeated likes of the same user on the same post are stored.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LikePolicy {
    /// Every like is recorded, so liking twice lists the user twice.
    #[default]
    Multiset,
    /// A user appears at most once in a post's likes.
    Unique,
}

impl LikePolicy {
    #[must_use]
    pub fn allows_duplicates(self) -> bool {
        matches!(self, LikePolicy::Multiset)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePost {
    pub author: Id<UserMarker>,
    pub content: PostContent,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateComment {
    pub author: Id<UserMarker>,
    pub text: String,
}
