use crate::{
    auth, comments,
    config::Config,
    db::{self, DbPool},
    error::{Error, Result},
    model::{Comment, Page, PageRequest, Status, Tweet, User},
    reactions::{self, Outcome, Target},
    statuses::{self, Catalog},
    tweets::{self, TweetFilter},
    users,
};
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};
use time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub jwt_secret: Arc<Vec<u8>>,
    pub login_limiter: auth::LoginRateLimiter,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let pool = db::open_pool(config.database_path())?;
        let conn = pool.get()?;
        let secret = auth::load_or_create_secret(&conn)?;
        drop(conn);
        Ok(Self {
            pool,
            config,
            jwt_secret: Arc::new(secret),
            login_limiter: auth::LoginRateLimiter::new(5, std::time::Duration::from_secs(60)),
        })
    }

    /// Run `f` against a pooled connection on the blocking thread pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
    }

    fn issue_token(&self, user: &User) -> Result<String> {
        auth::issue_jwt(
            &self.jwt_secret,
            user.id,
            Duration::hours(self.config.token_ttl_hours),
        )
    }

    fn page(&self, page: Option<u32>, page_size: Option<u32>) -> PageRequest {
        PageRequest::new(page, page_size, self.config.page_size)
    }
}

/// The authenticated caller, resolved from an `Authorization: Bearer` header.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(Error::Unauthorized)?;
        let claims =
            auth::verify_jwt(&state.jwt_secret, token).map_err(|_| Error::Unauthorized)?;
        let user_id = claims.user_id().ok_or(Error::Unauthorized)?;
        let user = state
            .with_conn(move |conn| users::get_user(conn, user_id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::Unauthorized,
                other => other,
            })?;
        Ok(AuthUser(user))
    }
}

/// JSON request body whose rejection renders as `{"error": "invalid_body"}`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ApiJson<T>
where
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                tracing::debug!("rejected body: {}", rejection.body_text());
                Error::Invalid("invalid_body")
            })?;
        Ok(ApiJson(value))
    }
}

/// Path parameters; a value that does not parse is `invalid_path`.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: PathRejection| {
                tracing::debug!("rejected path: {}", rejection.body_text());
                Error::Invalid("invalid_path")
            })?;
        Ok(ApiPath(value))
    }
}

/// Query string; a value that does not parse is `invalid_query`.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: QueryRejection| {
                tracing::debug!("rejected query: {}", rejection.body_text());
                Error::Invalid("invalid_query")
            })?;
        Ok(ApiQuery(value))
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users", post(register))
        .route("/api/login", post(login))
        .route("/api/me", get(me))
        .route("/api/token/refresh", post(refresh_token))
        .route("/api/tweets", get(list_tweets).post(create_tweet))
        .route(
            "/api/tweets/:id",
            get(get_tweet)
                .put(update_tweet)
                .patch(update_tweet)
                .delete(delete_tweet),
        )
        .route("/api/tweets/:id/statuses", get(tweet_statuses))
        .route("/api/tweets/:id/react/:slug", post(react_to_tweet))
        .route(
            "/api/tweets/:id/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/comments/:id",
            get(get_comment)
                .put(update_comment)
                .patch(update_comment)
                .delete(delete_comment),
        )
        .route("/api/comments/:id/statuses", get(comment_statuses))
        .route("/api/comments/:id/react/:slug", post(react_to_comment))
        .route("/api/statuses/tweets", get(tweet_catalog))
        .route("/api/statuses/comments", get(comment_catalog))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CredentialsReq {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResp {
    token: String,
    user: User,
}

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CredentialsReq>,
) -> Result<impl IntoResponse> {
    let user = state
        .with_conn(move |conn| users::create_user(conn, &req.username, &req.password))
        .await?;
    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CredentialsReq>,
) -> Result<impl IntoResponse> {
    if !state.login_limiter.check(&req.username).await {
        tracing::warn!(username = %req.username, "login rate limited");
        return Err(Error::RateLimited);
    }
    let username = req.username.clone();
    let user = state
        .with_conn(move |conn| users::authenticate(conn, &req.username, &req.password))
        .await
        .map_err(|e| {
            if matches!(e, Error::Unauthorized) {
                tracing::warn!(username = %username, "login failed");
            }
            e
        })?;
    let token = state.issue_token(&user)?;
    tracing::info!(user_id = user.id, "login");
    Ok(Json(LoginResp { token, user }))
}

async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

async fn refresh_token(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    let token = state.issue_token(&user)?;
    Ok(Json(LoginResp { token, user }))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Deserialize)]
struct TweetListQuery {
    user: Option<String>,
    search: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Deserialize)]
struct TextReq {
    text: String,
}

#[derive(Serialize)]
struct TweetDetail {
    #[serde(flatten)]
    tweet: Tweet,
    statuses: BTreeMap<String, i64>,
}

async fn list_tweets(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<TweetListQuery>,
) -> Result<Json<Page<Tweet>>> {
    let page = state.page(q.page, q.page_size);
    let filter = TweetFilter {
        user: q.user,
        search: q.search,
    };
    let tweets = state
        .with_conn(move |conn| tweets::list_tweets(conn, &filter, page))
        .await?;
    Ok(Json(tweets))
}

async fn create_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(req): ApiJson<TextReq>,
) -> Result<impl IntoResponse> {
    let tweet = state
        .with_conn(move |conn| tweets::create_tweet(conn, user.id, &req.text))
        .await?;
    Ok((StatusCode::CREATED, Json(tweet)))
}

async fn get_tweet(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<TweetDetail>> {
    let detail = state
        .with_conn(move |conn| {
            let tweet = tweets::get_tweet(conn, id)?;
            let statuses = reactions::status_counts(conn, Target::Tweet(id))?;
            Ok(TweetDetail { tweet, statuses })
        })
        .await?;
    Ok(Json(detail))
}

async fn update_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<TextReq>,
) -> Result<Json<Tweet>> {
    let tweet = state
        .with_conn(move |conn| tweets::update_tweet(conn, id, user.id, &req.text))
        .await?;
    Ok(Json(tweet))
}

async fn delete_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    state
        .with_conn(move |conn| tweets::delete_tweet(conn, id, user.id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn tweet_statuses(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<BTreeMap<String, i64>>> {
    let counts = state
        .with_conn(move |conn| reactions::status_counts(conn, Target::Tweet(id)))
        .await?;
    Ok(Json(counts))
}

async fn list_comments(
    State(state): State<AppState>,
    ApiPath(tweet_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<PageQuery>,
) -> Result<Json<Page<Comment>>> {
    let page = state.page(q.page, q.page_size);
    let comments = state
        .with_conn(move |conn| comments::list_comments(conn, tweet_id, page))
        .await?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(tweet_id): ApiPath<i64>,
    ApiJson(req): ApiJson<TextReq>,
) -> Result<impl IntoResponse> {
    let comment = state
        .with_conn(move |conn| comments::create_comment(conn, tweet_id, user.id, &req.text))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn get_comment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Comment>> {
    let comment = state
        .with_conn(move |conn| comments::get_comment(conn, id))
        .await?;
    Ok(Json(comment))
}

async fn update_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<TextReq>,
) -> Result<Json<Comment>> {
    let comment = state
        .with_conn(move |conn| comments::update_comment(conn, id, user.id, &req.text))
        .await?;
    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    state
        .with_conn(move |conn| comments::delete_comment(conn, id, user.id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn comment_statuses(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<BTreeMap<String, i64>>> {
    let counts = state
        .with_conn(move |conn| reactions::status_counts(conn, Target::Comment(id)))
        .await?;
    Ok(Json(counts))
}

async fn react_to_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath((id, slug)): ApiPath<(i64, String)>,
) -> Result<Response> {
    react(state, user, Target::Tweet(id), slug).await
}

async fn react_to_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath((id, slug)): ApiPath<(i64, String)>,
) -> Result<Response> {
    react(state, user, Target::Comment(id), slug).await
}

/// Created answers 201 with a `message`; an overwrite answers 200 and reports
/// the change under `error`, so clients can tell the two apart.
async fn react(state: AppState, user: User, target: Target, slug: String) -> Result<Response> {
    let user_id = user.id;
    let requested = slug.clone();
    let outcome = state
        .with_conn(move |conn| reactions::react(conn, user_id, target, &requested))
        .await?;
    let (kind, id) = (target.kind(), target.id());
    let resp = match outcome {
        Outcome::Created => (
            StatusCode::CREATED,
            Json(json!({
                "message": format!("{kind} {id} got status from {}", user.username),
                "status": slug,
            })),
        ),
        Outcome::Updated => (
            StatusCode::OK,
            Json(json!({
                "error": format!("{kind} {id} has changed status by {}", user.username),
                "status": slug,
            })),
        ),
    };
    Ok(resp.into_response())
}

async fn tweet_catalog(State(state): State<AppState>) -> Result<Json<Vec<Status>>> {
    let list = state
        .with_conn(|conn| statuses::list_statuses(conn, Catalog::Tweet))
        .await?;
    Ok(Json(list))
}

async fn comment_catalog(State(state): State<AppState>) -> Result<Json<Vec<Status>>> {
    let list = state
        .with_conn(|conn| statuses::list_statuses(conn, Catalog::Comment))
        .await?;
    Ok(Json(list))
}

/// Run the HTTP server until Ctrl+C.
pub async fn run_http_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    tracing::info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
