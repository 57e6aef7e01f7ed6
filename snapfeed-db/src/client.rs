use crate::{
    record::{
        AuthenticationRecord, CommentRecord, LikeRecord, PostRecord, UserRecord, from_db_id,
        to_db_id,
    },
    store::{PostFilter, Result, Store},
};
use snapfeed_common::{
    model::{
        Id, SnapfeedSnowflake, SnapfeedSnowflakeGenerator,
        auth::{AuthTokenHash, Authentication},
        post::{CommentDocument, CreateComment, CreatePost, LikePolicy, PostDocument, PostMarker},
        user::{Identity, User, UserMarker},
    },
    snowflake::{ProcessId, WorkerId},
};
use sqlx::{
    PgConnection, PgPool, query, query_as, query_scalar,
    postgres::PgPoolOptions,
};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use time::OffsetDateTime;
use tracing::{debug, info};

const POST_COLUMNS: &str = "
    posts.post_snowflake,
    posts.user_snowflake,
    posts.title,
    posts.body,
    posts.photo,
    posts.created_at
";

/// PostgreSQL backed [`Store`].
pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<SnapfeedSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator =
            Mutex::new(SnapfeedSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    /// Opens a pool against `database_url` and wraps it.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self> {
        debug!(max_connections, "Connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("Database pool created");

        Ok(Self::new(pool, worker_id, process_id))
    }

    /// Waits for checked out connections to return, then closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        info!("Database migrations are up to date");

        Ok(())
    }

    fn generate_snowflake(&self, time: OffsetDateTime) -> Result<SnapfeedSnowflake> {
        // The generator is plain data, so a poisoned lock holds nothing half written.
        let snowflake = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate_at(time)?;

        Ok(snowflake)
    }
}

/// Attaches likes and comments to the given post rows.
async fn hydrate_posts(
    conn: &mut PgConnection,
    records: Vec<PostRecord>,
) -> Result<Vec<PostDocument>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let post_snowflakes: Vec<i64> = records.iter().map(|record| record.post_snowflake).collect();

    let likes = query_as::<_, LikeRecord>(
        "
        SELECT
            likes.post_snowflake,
            likes.user_snowflake
        FROM
            posts.likes
        WHERE
            likes.post_snowflake = ANY($1)
        ORDER BY
            likes.like_id
        ",
    )
    .bind(&post_snowflakes)
    .fetch_all(&mut *conn)
    .await?;

    let comments = query_as::<_, CommentRecord>(
        "
        SELECT
            comments.comment_snowflake,
            comments.post_snowflake,
            comments.user_snowflake,
            comments.text,
            comments.created_at
        FROM
            posts.comments
        WHERE
            comments.post_snowflake = ANY($1)
        ORDER BY
            comments.created_at,
            comments.comment_snowflake
        ",
    )
    .bind(&post_snowflakes)
    .fetch_all(&mut *conn)
    .await?;

    let mut likes_by_post: HashMap<i64, Vec<Id<UserMarker>>> = HashMap::new();
    for like in likes {
        likes_by_post
            .entry(like.post_snowflake)
            .or_default()
            .push(from_db_id(like.user_snowflake));
    }

    let mut comments_by_post: HashMap<i64, Vec<CommentDocument>> = HashMap::new();
    for comment in comments {
        comments_by_post
            .entry(comment.post_snowflake)
            .or_default()
            .push(comment.into());
    }

    let posts = records
        .into_iter()
        .map(|record| {
            let post_snowflake = record.post_snowflake;
            let mut post = PostDocument::from(record);
            post.likes = likes_by_post.remove(&post_snowflake).unwrap_or_default();
            post.comments = comments_by_post
                .remove(&post_snowflake)
                .unwrap_or_default();
            post
        })
        .collect();

    Ok(posts)
}

async fn fetch_post_with(
    conn: &mut PgConnection,
    post_id: Id<PostMarker>,
) -> Result<Option<PostDocument>> {
    let record = query_as::<_, PostRecord>(&format!(
        "SELECT {POST_COLUMNS} FROM posts.posts WHERE posts.post_snowflake = $1"
    ))
    .bind(to_db_id(post_id))
    .fetch_optional(&mut *conn)
    .await?;

    let Some(record) = record else {
        return Ok(None);
    };

    Ok(hydrate_posts(conn, vec![record]).await?.pop())
}

impl Store for DbClient {
    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                authentications.user_snowflake,
                authentications.token_hash,
                authentications.created_at,
                authentications.expires_after_seconds
            FROM
                users.authentications
            WHERE
                authentications.token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    async fn fetch_identity(&self, user_id: Id<UserMarker>) -> Result<Option<Identity>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.name
            FROM
                users.users
            WHERE
                users.user_snowflake = $1
            ",
        )
        .bind(to_db_id(user_id))
        .fetch_optional(&self.pool)
        .await?;

        let Some(user) = record.map(User::try_from).transpose()? else {
            return Ok(None);
        };

        let following = query_scalar::<_, i64>(
            "
            SELECT
                follows.followee_snowflake
            FROM
                users.follows
            WHERE
                follows.follower_snowflake = $1
            ",
        )
        .bind(to_db_id(user_id))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(from_db_id)
        .collect();

        Ok(Some(Identity { user, following }))
    }

    async fn fetch_users(&self, user_ids: &[Id<UserMarker>]) -> Result<Vec<User>> {
        let user_snowflakes: Vec<i64> = user_ids.iter().copied().map(to_db_id).collect();

        let records = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.name
            FROM
                users.users
            WHERE
                users.user_snowflake = ANY($1)
            ",
        )
        .bind(&user_snowflakes)
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    async fn fetch_posts(&self, filter: &PostFilter) -> Result<Vec<PostDocument>> {
        let authors: Option<Vec<i64>> = match filter {
            PostFilter::All => None,
            PostFilter::AuthoredBy(author) => Some(vec![to_db_id(*author)]),
            PostFilter::AuthoredByAny(authors) => {
                Some(authors.iter().copied().map(to_db_id).collect())
            }
        };

        let mut conn = self.pool.acquire().await?;

        let records = query_as::<_, PostRecord>(&format!(
            "
            SELECT {POST_COLUMNS}
            FROM
                posts.posts
            WHERE
                $1::BIGINT[] IS NULL OR posts.user_snowflake = ANY($1)
            ORDER BY
                posts.created_at DESC,
                posts.post_snowflake DESC
            "
        ))
        .bind(authors)
        .fetch_all(&mut *conn)
        .await?;

        hydrate_posts(&mut conn, records).await
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<PostDocument>> {
        let mut conn = self.pool.acquire().await?;
        fetch_post_with(&mut conn, post_id).await
    }

    async fn insert_post(&self, post: &CreatePost) -> Result<PostDocument> {
        let created_at = OffsetDateTime::now_utc();
        let post_snowflake = self.generate_snowflake(created_at)?;

        let record = query_as::<_, PostRecord>(&format!(
            "
            INSERT INTO posts.posts (post_snowflake, user_snowflake, title, body, photo, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {POST_COLUMNS}
            "
        ))
        .bind(post_snowflake.get().cast_signed())
        .bind(to_db_id(post.author))
        .bind(&post.content.title)
        .bind(&post.content.body)
        .bind(&post.content.photo)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }

    async fn push_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        policy: LikePolicy,
    ) -> Result<Option<PostDocument>> {
        let mut transaction = self.pool.begin().await?;

        query(
            "
            INSERT INTO posts.likes (post_snowflake, user_snowflake)
            SELECT
                posts.post_snowflake,
                $2
            FROM
                posts.posts
            WHERE
                posts.post_snowflake = $1
                AND (
                    $3
                    OR NOT EXISTS (
                        SELECT 1
                        FROM posts.likes
                        WHERE likes.post_snowflake = $1 AND likes.user_snowflake = $2
                    )
                )
            ",
        )
        .bind(to_db_id(post_id))
        .bind(to_db_id(user_id))
        .bind(policy.allows_duplicates())
        .execute(&mut *transaction)
        .await?;

        let post = fetch_post_with(&mut transaction, post_id).await?;
        transaction.commit().await?;

        Ok(post)
    }

    async fn pull_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<PostDocument>> {
        let mut transaction = self.pool.begin().await?;

        query(
            "
            DELETE FROM posts.likes
            WHERE likes.post_snowflake = $1 AND likes.user_snowflake = $2
            ",
        )
        .bind(to_db_id(post_id))
        .bind(to_db_id(user_id))
        .execute(&mut *transaction)
        .await?;

        let post = fetch_post_with(&mut transaction, post_id).await?;
        transaction.commit().await?;

        Ok(post)
    }

    async fn push_comment(
        &self,
        post_id: Id<PostMarker>,
        comment: &CreateComment,
    ) -> Result<Option<PostDocument>> {
        let created_at = OffsetDateTime::now_utc();
        let comment_snowflake = self.generate_snowflake(created_at)?;

        let mut transaction = self.pool.begin().await?;

        query(
            "
            INSERT INTO posts.comments
                (comment_snowflake, post_snowflake, user_snowflake, text, created_at)
            SELECT
                $1,
                posts.post_snowflake,
                $3,
                $4,
                $5
            FROM
                posts.posts
            WHERE
                posts.post_snowflake = $2
            ",
        )
        .bind(comment_snowflake.get().cast_signed())
        .bind(to_db_id(post_id))
        .bind(to_db_id(comment.author))
        .bind(&comment.text)
        .bind(created_at)
        .execute(&mut *transaction)
        .await?;

        let post = fetch_post_with(&mut transaction, post_id).await?;
        transaction.commit().await?;

        Ok(post)
    }

    async fn remove_post(&self, post_id: Id<PostMarker>) -> Result<Option<PostDocument>> {
        let mut transaction = self.pool.begin().await?;

        let Some(post) = fetch_post_with(&mut transaction, post_id).await? else {
            return Ok(None);
        };

        query("DELETE FROM posts.posts WHERE posts.post_snowflake = $1")
            .bind(to_db_id(post_id))
            .execute(&mut *transaction)
            .await?;
        transaction.commit().await?;

        Ok(Some(post))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::DbClient,
        record::to_db_id,
        store::{PostFilter, Store},
    };
    use snapfeed_common::{
        model::{
            Id,
            auth::AuthToken,
            post::{CreateComment, CreatePost, LikePolicy, PostContent, PostDocument, PostMarker},
            user::UserMarker,
        },
        snowflake::{ProcessId, WorkerId},
        util::PositiveDuration,
    };
    use sqlx::{query, query_scalar};
    use time::{Duration, OffsetDateTime};

    async fn connect() -> DbClient {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must name a scratch database");
        let client = DbClient::connect(&database_url, 2, WorkerId::default(), ProcessId::default())
            .await
            .unwrap();
        client.migrate().await.unwrap();
        client
    }

    fn fresh_id<Marker>(client: &DbClient) -> Id<Marker> {
        client
            .generate_snowflake(OffsetDateTime::now_utc())
            .unwrap()
            .into()
    }

    async fn insert_user(client: &DbClient, name: &str) -> Id<UserMarker> {
        let user_id = fresh_id(client);
        query("INSERT INTO users.users (user_snowflake, name) VALUES ($1, $2)")
            .bind(to_db_id(user_id))
            .bind(name)
            .execute(&client.pool)
            .await
            .unwrap();
        user_id
    }

    async fn count_rows(client: &DbClient, table: &str, post_id: Id<PostMarker>) -> i64 {
        query_scalar(&format!(
            "SELECT count(*) FROM {table} WHERE post_snowflake = $1"
        ))
        .bind(to_db_id(post_id))
        .fetch_one(&client.pool)
        .await
        .unwrap()
    }

    fn ids(posts: &[PostDocument]) -> Vec<Id<PostMarker>> {
        posts.iter().map(|post| post.id).collect()
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL database in DATABASE_URL"]
    async fn postgres_store() {
        let client = connect().await;
        let ada = insert_user(&client, "ada").await;
        let grace = insert_user(&client, "grace").await;
        let missing = fresh_id::<PostMarker>(&client);

        let token_hash = AuthToken::generate_random(ada).hash().unwrap();
        query(
            "INSERT INTO users.authentications (token_hash, user_snowflake, expires_after_seconds)
            VALUES ($1, $2, $3)",
        )
        .bind(&token_hash.0[..])
        .bind(to_db_id(ada))
        .bind(3600_i64)
        .execute(&client.pool)
        .await
        .unwrap();
        query("INSERT INTO users.follows (follower_snowflake, followee_snowflake) VALUES ($1, $2)")
            .bind(to_db_id(ada))
            .bind(to_db_id(grace))
            .execute(&client.pool)
            .await
            .unwrap();

        let authentication = client
            .fetch_authentication(&token_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(authentication.user, ada);
        assert_eq!(
            authentication.expires_after,
            PositiveDuration::new(Duration::hours(1))
        );
        let identity = client.fetch_identity(ada).await.unwrap().unwrap();
        assert!(identity.follows(grace));
        assert_eq!(client.fetch_users(&[ada, grace]).await.unwrap().len(), 2);

        let content = PostContent {
            title: " ".to_owned(),
            body: "b".to_owned(),
            photo: "p.jpg".to_owned(),
        };
        let first = client
            .insert_post(&CreatePost {
                author: ada,
                content: content.clone(),
            })
            .await
            .unwrap();
        let second = client
            .insert_post(&CreatePost {
                author: grace,
                content,
            })
            .await
            .unwrap();
        assert_eq!(first.content.title, " ");

        assert_eq!(
            ids(&client.fetch_posts(&PostFilter::AuthoredBy(ada)).await.unwrap()),
            [first.id]
        );
        assert_eq!(
            ids(&client
                .fetch_posts(&PostFilter::AuthoredByAny(vec![ada, grace]))
                .await
                .unwrap()),
            [second.id, first.id]
        );
        let all = ids(&client.fetch_posts(&PostFilter::All).await.unwrap());
        assert!(all.contains(&first.id) && all.contains(&second.id));

        client
            .push_like(first.id, grace, LikePolicy::Multiset)
            .await
            .unwrap();
        let liked = client
            .push_like(first.id, grace, LikePolicy::Multiset)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(liked.likes, [grace, grace]);
        let liked = client
            .push_like(first.id, grace, LikePolicy::Unique)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(liked.likes, [grace, grace]);
        let liked = client
            .push_like(first.id, ada, LikePolicy::Unique)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(liked.likes, [grace, grace, ada]);
        let unliked = client.pull_like(first.id, grace).await.unwrap().unwrap();
        assert_eq!(unliked.likes, [ada]);

        let commented = client
            .push_comment(
                first.id,
                &CreateComment {
                    author: grace,
                    text: "hello".to_owned(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commented.comments.len(), 1);
        assert_eq!(commented.comments[0].posted_by, grace);

        let comment = CreateComment {
            author: ada,
            text: "lost".to_owned(),
        };
        assert!(client.push_like(missing, ada, LikePolicy::Multiset).await.unwrap().is_none());
        assert!(client.pull_like(missing, ada).await.unwrap().is_none());
        assert!(client.push_comment(missing, &comment).await.unwrap().is_none());
        assert_eq!(count_rows(&client, "posts.comments", missing).await, 0);

        let removed = client.remove_post(first.id).await.unwrap().unwrap();
        assert_eq!(removed.likes, [ada]);
        assert!(client.fetch_post(first.id).await.unwrap().is_none());
        assert_eq!(count_rows(&client, "posts.likes", first.id).await, 0);
        assert_eq!(count_rows(&client, "posts.comments", first.id).await, 0);
        assert!(client.remove_post(first.id).await.unwrap().is_none());

        client.close().await;
    }
}
