//! An in-process [`Store`] for tests and local development.

use crate::store::{DbError, PostFilter, Result, Store};
use snapfeed_common::{
    model::{
        Id, SnapfeedSnowflakeGenerator,
        auth::{AuthToken, AuthTokenHash, AuthTokenHashError, Authentication},
        post::{CommentDocument, CreateComment, CreatePost, LikePolicy, PostDocument, PostMarker},
        user::{Identity, User, UserMarker, UserName},
    },
    snowflake::{ProcessId, WorkerId},
    util::PositiveDuration,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum IssueTokenError {
    #[error(transparent)]
    Hash(#[from] AuthTokenHashError),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Default)]
struct Collections {
    users: BTreeMap<Id<UserMarker>, User>,
    follows: BTreeMap<Id<UserMarker>, BTreeSet<Id<UserMarker>>>,
    authentications: HashMap<AuthTokenHash, Authentication>,
    posts: BTreeMap<Id<PostMarker>, PostDocument>,
    snowflake_generator: SnapfeedSnowflakeGenerator,
}

impl Collections {
    fn generate_id<Marker>(&mut self, time: OffsetDateTime) -> Result<Id<Marker>> {
        Ok(self.snowflake_generator.generate_at(time)?.into())
    }

    fn update_post(
        &mut self,
        post_id: Id<PostMarker>,
        update: impl FnOnce(&mut PostDocument),
    ) -> Option<PostDocument> {
        let post = self.posts.get_mut(&post_id)?;
        update(post);
        Some(post.clone())
    }
}

/// Keeps every collection behind one mutex, so each call is atomic.
#[derive(Debug)]
pub struct MemoryDb {
    collections: Mutex<Collections>,
    closed: AtomicBool,
}

impl MemoryDb {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            collections: Mutex::new(Collections {
                snowflake_generator: SnapfeedSnowflakeGenerator::new(worker_id, process_id),
                ..Collections::default()
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Makes every following call fail with [`DbError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn collections(&self) -> Result<MutexGuard<'_, Collections>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }

        self.collections.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn insert_user(&self, name: UserName) -> Result<User> {
        let mut collections = self.collections()?;
        let user = User {
            id: collections.generate_id(OffsetDateTime::now_utc())?,
            name,
        };
        collections.users.insert(user.id, user.clone());

        Ok(user)
    }

    pub fn follow(&self, follower: Id<UserMarker>, followee: Id<UserMarker>) -> Result<()> {
        self.collections()?
            .follows
            .entry(follower)
            .or_default()
            .insert(followee);

        Ok(())
    }

    /// Creates a login for `user_id` and hands out its token.
    pub fn issue_token(
        &self,
        user_id: Id<UserMarker>,
        expires_after: Option<PositiveDuration>,
    ) -> Result<AuthToken, IssueTokenError> {
        let token = AuthToken::generate_random(user_id);
        let token_hash = token.hash()?;

        self.insert_authentication(Authentication {
            user: user_id,
            token_hash,
            created_at: OffsetDateTime::now_utc(),
            expires_after,
        })?;

        Ok(token)
    }

    pub fn insert_authentication(&self, authentication: Authentication) -> Result<()> {
        self.collections()?
            .authentications
            .insert(authentication.token_hash.clone(), authentication);

        Ok(())
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new(WorkerId::default(), ProcessId::default())
    }
}

impl Store for MemoryDb {
    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        Ok(self.collections()?.authentications.get(token_hash).cloned())
    }

    async fn fetch_identity(&self, user_id: Id<UserMarker>) -> Result<Option<Identity>> {
        let collections = self.collections()?;

        let identity = collections.users.get(&user_id).map(|user| Identity {
            user: user.clone(),
            following: collections
                .follows
                .get(&user_id)
                .cloned()
                .unwrap_or_default(),
        });
        Ok(identity)
    }

    async fn fetch_users(&self, user_ids: &[Id<UserMarker>]) -> Result<Vec<User>> {
        let collections = self.collections()?;

        let users = user_ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|user_id| collections.users.get(user_id).cloned())
            .collect();
        Ok(users)
    }

    async fn fetch_posts(&self, filter: &PostFilter) -> Result<Vec<PostDocument>> {
        let collections = self.collections()?;

        let mut posts: Vec<PostDocument> = collections
            .posts
            .values()
            .filter(|post| filter.matches(post))
            .cloned()
            .collect();
        posts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(posts)
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<PostDocument>> {
        Ok(self.collections()?.posts.get(&post_id).cloned())
    }

    async fn insert_post(&self, post: &CreatePost) -> Result<PostDocument> {
        let mut collections = self.collections()?;

        let created_at = OffsetDateTime::now_utc();
        let document = PostDocument {
            id: collections.generate_id(created_at)?,
            content: post.content.clone(),
            posted_by: post.author,
            likes: Vec::new(),
            comments: Vec::new(),
            created_at,
        };
        collections.posts.insert(document.id, document.clone());

        Ok(document)
    }

    async fn push_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        policy: LikePolicy,
    ) -> Result<Option<PostDocument>> {
        let post = self.collections()?.update_post(post_id, |post| {
            if policy.allows_duplicates() || !post.likes.contains(&user_id) {
                post.likes.push(user_id);
            }
        });

        Ok(post)
    }

    async fn pull_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<PostDocument>> {
        let post = self
            .collections()?
            .update_post(post_id, |post| post.likes.retain(|like| *like != user_id));

        Ok(post)
    }

    async fn push_comment(
        &self,
        post_id: Id<PostMarker>,
        comment: &CreateComment,
    ) -> Result<Option<PostDocument>> {
        let mut collections = self.collections()?;
        if !collections.posts.contains_key(&post_id) {
            return Ok(None);
        }

        let created_at = OffsetDateTime::now_utc();
        let document = CommentDocument {
            id: collections.generate_id(created_at)?,
            text: comment.text.clone(),
            posted_by: comment.author,
            created_at,
        };

        Ok(collections.update_post(post_id, |post| post.comments.push(document)))
    }

    async fn remove_post(&self, post_id: Id<PostMarker>) -> Result<Option<PostDocument>> {
        Ok(self.collections()?.posts.remove(&post_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::MemoryDb,
        store::{DbError, PostFilter, Store},
    };
    use snapfeed_common::model::{
        Id,
        post::{CreateComment, CreatePost, LikePolicy, PostContent},
        user::{User, UserName},
    };

    fn user(db: &MemoryDb, name: &str) -> User {
        db.insert_user(UserName::new(name.to_owned()).unwrap())
            .unwrap()
    }

    fn create_post(author: &User, title: &str) -> CreatePost {
        CreatePost {
            author: author.id,
            content: PostContent {
                title: title.to_owned(),
                body: "body".to_owned(),
                photo: "photo.jpg".to_owned(),
            },
        }
    }

    #[tokio::test]
    async fn posts_are_listed_newest_first() {
        let db = MemoryDb::default();
        let ada = user(&db, "ada");
        let grace = user(&db, "grace");

        let first = db.insert_post(&create_post(&ada, "first")).await.unwrap();
        let second = db.insert_post(&create_post(&grace, "second")).await.unwrap();
        let third = db.insert_post(&create_post(&ada, "third")).await.unwrap();

        let all: Vec<_> = db
            .fetch_posts(&PostFilter::All)
            .await
            .unwrap()
            .into_iter()
            .map(|post| post.id)
            .collect();
        assert_eq!(all, [third.id, second.id, first.id]);

        let by_ada: Vec<_> = db
            .fetch_posts(&PostFilter::AuthoredBy(ada.id))
            .await
            .unwrap()
            .into_iter()
            .map(|post| post.id)
            .collect();
        assert_eq!(by_ada, [third.id, first.id]);

        assert!(
            db.fetch_posts(&PostFilter::AuthoredByAny(Vec::new()))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn like_policies() {
        let db = MemoryDb::default();
        let ada = user(&db, "ada");
        let post = db.insert_post(&create_post(&ada, "t")).await.unwrap();

        for _ in 0..2 {
            db.push_like(post.id, ada.id, LikePolicy::Unique)
                .await
                .unwrap();
        }
        let post_after_unique = db.fetch_post(post.id).await.unwrap().unwrap();
        assert_eq!(post_after_unique.likes, [ada.id]);

        db.push_like(post.id, ada.id, LikePolicy::Multiset)
            .await
            .unwrap();
        let post_after_multiset = db.fetch_post(post.id).await.unwrap().unwrap();
        assert_eq!(post_after_multiset.likes, [ada.id, ada.id]);

        let unliked = db.pull_like(post.id, ada.id).await.unwrap().unwrap();
        assert!(unliked.likes.is_empty());
    }

    #[tokio::test]
    async fn mutations_on_missing_posts() {
        let db = MemoryDb::default();
        let ada = user(&db, "ada");
        let missing = Id::from(12_345_u64);

        assert!(
            db.push_like(missing, ada.id, LikePolicy::Multiset)
                .await
                .unwrap()
                .is_none()
        );
        assert!(db.pull_like(missing, ada.id).await.unwrap().is_none());
        assert!(
            db.push_comment(
                missing,
                &CreateComment {
                    author: ada.id,
                    text: "hi".to_owned()
                }
            )
            .await
            .unwrap()
            .is_none()
        );
        assert!(db.remove_post(missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identity_and_users() {
        let db = MemoryDb::default();
        let ada = user(&db, "ada");
        let grace = user(&db, "grace");
        db.follow(ada.id, grace.id).unwrap();

        let identity = db.fetch_identity(ada.id).await.unwrap().unwrap();
        assert_eq!(identity.user, ada);
        assert!(identity.follows(grace.id));

        let users = db
            .fetch_users(&[grace.id, Id::from(1_u64), grace.id])
            .await
            .unwrap();
        assert_eq!(users, [grace]);
    }

    #[tokio::test]
    async fn issued_tokens_resolve() {
        let db = MemoryDb::default();
        let ada = user(&db, "ada");

        let token = db.issue_token(ada.id, None).unwrap();
        let authentication = db
            .fetch_authentication(&token.hash().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(authentication.user, ada.id);
    }

    #[tokio::test]
    async fn closed_store_fails() {
        let db = MemoryDb::default();
        db.close();

        assert!(matches!(
            db.fetch_posts(&PostFilter::All).await,
            Err(DbError::Closed)
        ));
    }
}
