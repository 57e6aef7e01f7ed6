use crate::server::ServerRouter;
use axum::Router;
use snapfeed_db::Store;

mod posts;

pub fn routes<S: Store>() -> ServerRouter<S> {
    Router::new().merge(posts::routes())
}
