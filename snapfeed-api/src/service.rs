//! Authorization and data-shape rules for posts, likes, comments and feeds.
//!
//! Every operation takes the caller [`Identity`] resolved by the auth gate.
//! Storage hands out documents that name users by id only; the service joins
//! them with the users they reference before returning them.

use snapfeed_common::model::{
    Id,
    post::{
        Comment, CommentDocument, CreateComment, CreatePost, EmptyFieldError, LikePolicy, Post,
        PostContent, PostDocument, PostMarker, require_text,
    },
    user::{Identity, User, UserMarker},
};
use snapfeed_db::{DbError, PostFilter, Store};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] EmptyFieldError),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("User {user} is not allowed to delete post {post}.")]
    Forbidden {
        post: Id<PostMarker>,
        user: Id<UserMarker>,
    },
    #[error("A stored document references the unknown user {0}.")]
    DanglingUser(Id<UserMarker>),
    #[error(transparent)]
    Storage(#[from] DbError),
}

pub struct PostService<S> {
    store: Arc<S>,
    like_policy: LikePolicy,
}

impl<S: Store> PostService<S> {
    #[must_use]
    pub fn new(store: Arc<S>, like_policy: LikePolicy) -> Self {
        Self { store, like_policy }
    }

    pub async fn list_all(&self, caller: &Identity) -> Result<Vec<Post>> {
        let posts = self.store.fetch_posts(&PostFilter::All).await?;
        debug!(user_id = %caller.id(), count = posts.len(), "Listing all posts");

        self.resolve_all(posts).await
    }

    /// Posts of everyone the caller follows. Following nobody is not an error.
    pub async fn list_following(&self, caller: &Identity) -> Result<Vec<Post>> {
        if caller.following.is_empty() {
            return Ok(Vec::new());
        }

        let filter = PostFilter::AuthoredByAny(caller.following.iter().copied().collect());
        let posts = self.store.fetch_posts(&filter).await?;
        debug!(user_id = %caller.id(), count = posts.len(), "Listing followed posts");

        self.resolve_all(posts).await
    }

    pub async fn list_mine(&self, caller: &Identity) -> Result<Vec<Post>> {
        let posts = self
            .store
            .fetch_posts(&PostFilter::AuthoredBy(caller.id()))
            .await?;
        debug!(user_id = %caller.id(), count = posts.len(), "Listing own posts");

        self.resolve_all(posts).await
    }

    pub async fn create(&self, caller: &Identity, content: PostContent) -> Result<Post> {
        content.validate()?;

        let post = self
            .store
            .insert_post(&CreatePost {
                author: caller.id(),
                content,
            })
            .await?;
        info!(user_id = %caller.id(), post_id = %post.id, "Created post");

        self.resolve(post).await
    }

    pub async fn like(&self, caller: &Identity, post_id: Id<PostMarker>) -> Result<Post> {
        let post = self
            .store
            .push_like(post_id, caller.id(), self.like_policy)
            .await?
            .ok_or(ServiceError::PostNotFound(post_id))?;
        debug!(user_id = %caller.id(), %post_id, policy = ?self.like_policy, "Liked post");

        self.resolve(post).await
    }

    pub async fn unlike(&self, caller: &Identity, post_id: Id<PostMarker>) -> Result<Post> {
        let post = self
            .store
            .pull_like(post_id, caller.id())
            .await?
            .ok_or(ServiceError::PostNotFound(post_id))?;
        debug!(user_id = %caller.id(), %post_id, "Unliked post");

        self.resolve(post).await
    }

    pub async fn comment(
        &self,
        caller: &Identity,
        post_id: Id<PostMarker>,
        text: String,
    ) -> Result<Post> {
        require_text("text", &text)?;

        let comment = CreateComment {
            author: caller.id(),
            text,
        };
        let post = self
            .store
            .push_comment(post_id, &comment)
            .await?
            .ok_or(ServiceError::PostNotFound(post_id))?;
        debug!(user_id = %caller.id(), %post_id, "Commented on post");

        self.resolve(post).await
    }

    /// Deletes a post owned by the caller and returns it.
    ///
    /// A post that does not exist yields `Ok(None)` rather than an error.
    pub async fn delete(
        &self,
        caller: &Identity,
        post_id: Id<PostMarker>,
    ) -> Result<Option<Post>> {
        let Some(post) = self.store.fetch_post(post_id).await? else {
            return Ok(None);
        };

        if post.posted_by != caller.id() {
            warn!(
                user_id = %caller.id(),
                %post_id,
                owner_id = %post.posted_by,
                "Refusing to delete a post owned by someone else"
            );
            return Err(ServiceError::Forbidden {
                post: post_id,
                user: caller.id(),
            });
        }

        let Some(removed) = self.store.remove_post(post_id).await? else {
            return Ok(None);
        };
        info!(user_id = %caller.id(), %post_id, "Deleted post");

        self.resolve(removed).await.map(Some)
    }

    async fn resolve(&self, post: PostDocument) -> Result<Post> {
        let mut posts = self.resolve_all(vec![post]).await?;
        Ok(posts.remove(0))
    }

    /// Joins posts with every user they reference, using one lookup.
    async fn resolve_all(&self, posts: Vec<PostDocument>) -> Result<Vec<Post>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<_> = posts
            .iter()
            .flat_map(|post| post.referenced_users())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let users: HashMap<_, _> = self
            .store
            .fetch_users(&user_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        posts
            .into_iter()
            .map(|post| join_post(post, &users))
            .collect()
    }
}

fn lookup_user(users: &HashMap<Id<UserMarker>, User>, user_id: Id<UserMarker>) -> Result<User> {
    users
        .get(&user_id)
        .cloned()
        .ok_or(ServiceError::DanglingUser(user_id))
}

fn join_post(post: PostDocument, users: &HashMap<Id<UserMarker>, User>) -> Result<Post> {
    let comments = post
        .comments
        .into_iter()
        .map(|comment| join_comment(comment, users))
        .collect::<Result<_>>()?;

    Ok(Post {
        id: post.id,
        content: post.content,
        posted_by: lookup_user(users, post.posted_by)?,
        likes: post.likes,
        comments,
        created_at: post.created_at,
    })
}

fn join_comment(comment: CommentDocument, users: &HashMap<Id<UserMarker>, User>) -> Result<Comment> {
    Ok(Comment {
        id: comment.id,
        text: comment.text,
        posted_by: lookup_user(users, comment.posted_by)?,
        created_at: comment.created_at,
    })
}
