use crate::{
    server::{
        Result, ServerError, ServerRouter,
        auth::AuthenticatedUser,
        json::{Envelope, Json},
    },
    service::PostService,
};
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use snapfeed_common::model::{
    Id,
    post::{Post, PostContent, PostMarker},
};
use snapfeed_db::Store;
use std::sync::Arc;

pub fn routes<S: Store>() -> ServerRouter<S> {
    Router::new()
        .typed_get(all_posts::<S>)
        .typed_get(following_posts::<S>)
        .typed_get(my_posts::<S>)
        .typed_post(create_post::<S>)
        .typed_put(like_post::<S>)
        .typed_put(unlike_post::<S>)
        .typed_put(comment_post::<S>)
        .typed_delete(delete_post::<S>)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostIdBody {
    post_id: Id<PostMarker>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentBody {
    post_id: Id<PostMarker>,
    #[serde(default)]
    text: String,
}

#[derive(TypedPath)]
#[typed_path("/allPost")]
struct AllPostsPath;

async fn all_posts<S: Store>(
    _: AllPostsPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
) -> Result<Envelope<Vec<Post>>> {
    let all = posts.list_all(&caller).await?;

    Ok(Envelope::success("Yay, successfully load all post.", all))
}

#[derive(TypedPath)]
#[typed_path("/followingPost")]
struct FollowingPostsPath;

async fn following_posts<S: Store>(
    _: FollowingPostsPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
) -> Result<Envelope<Vec<Post>>> {
    let following = posts.list_following(&caller).await?;

    Ok(Envelope::success(
        "Yay, successfully load all following post.",
        following,
    ))
}

#[derive(TypedPath)]
#[typed_path("/myPost")]
struct MyPostsPath;

async fn my_posts<S: Store>(
    _: MyPostsPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
) -> Result<Envelope<Vec<Post>>> {
    let mine = posts.list_mine(&caller).await?;

    Ok(Envelope::success("Yay, successfully load my post.", mine))
}

#[derive(TypedPath)]
#[typed_path("/createPost")]
struct CreatePostPath;

async fn create_post<S: Store>(
    _: CreatePostPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Json(content): Json<PostContent>,
) -> Result<Envelope<Post>> {
    let post = posts.create(&caller, content).await?;

    Ok(Envelope::success("Yay, successfully create post.", post))
}

#[derive(TypedPath)]
#[typed_path("/likePost")]
struct LikePostPath;

async fn like_post<S: Store>(
    _: LikePostPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Json(PostIdBody { post_id }): Json<PostIdBody>,
) -> Result<Envelope<Post>> {
    let post = posts.like(&caller, post_id).await?;

    Ok(Envelope::success("Yay, successfully like this post.", post))
}

#[derive(TypedPath)]
#[typed_path("/unlikePost")]
struct UnlikePostPath;

async fn unlike_post<S: Store>(
    _: UnlikePostPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Json(PostIdBody { post_id }): Json<PostIdBody>,
) -> Result<Envelope<Post>> {
    let post = posts.unlike(&caller, post_id).await?;

    Ok(Envelope::success("Yay, successfully unlike this post.", post))
}

#[derive(TypedPath)]
#[typed_path("/comment")]
struct CommentPath;

async fn comment_post<S: Store>(
    _: CommentPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
    Json(CommentBody { post_id, text }): Json<CommentBody>,
) -> Result<Envelope<Post>> {
    let post = posts.comment(&caller, post_id, text).await?;

    Ok(Envelope::success("Yay, successfully comment this post.", post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/deletePost/{post_id}", rejection(ServerError))]
struct DeletePostPath {
    post_id: Id<PostMarker>,
}

async fn delete_post<S: Store>(
    DeletePostPath { post_id }: DeletePostPath,
    State(posts): State<Arc<PostService<S>>>,
    AuthenticatedUser(caller): AuthenticatedUser,
) -> Result<Envelope<Option<Post>>> {
    let envelope = match posts.delete(&caller, post_id).await? {
        Some(post) => Envelope::success("Yay, successfully delete this post.", Some(post)),
        None => Envelope::success("Oops, cant find any post.", None),
    };

    Ok(envelope)
}
