use std::net::SocketAddr;

use axum::{
    extract::{Extension, Path, Query, TypedHeader},
    handler::{delete, get, post, put},
    http::StatusCode,
    AddExtensionLayer, Json, Router,
};
use governor::Quota;
use headers::{authorization::Bearer, Authorization};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tower::layer::layer_fn;
use tower_http::trace::TraceLayer;

use crate::logging::{LogError, LogWorkflow, WebResult};
use crate::model::{
    Applicant, ChatMessage, Job, JobChat, Notification, NotificationKind, Rating, User,
};
use crate::rate_limiter::RateLimiterMiddleware;
use crate::server_state::ServerState;
use crate::workflows::{self, JobDraft, JobPatch, ProfileUpdate, RatingSubmission};

async fn status() -> &'static str {
    "ok"
}

// ---- response views (documents plus their ids, times as RFC 3339) ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    id: String,
    title: String,
    description: String,
    location: String,
    salary: String,
    job_type: String,
    employer_id: String,
    company_name: String,
    workers_needed: u32,
    work_dates: Vec<String>,
    is_fully_staffed: bool,
    is_completed: bool,
    is_public: bool,
    is_rated: bool,
    created_at: String,
}

impl JobView {
    fn new(id: String, job: Job) -> Self {
        JobView {
            id,
            title: job.title,
            description: job.description,
            location: job.location,
            salary: job.salary,
            job_type: job.job_type,
            employer_id: job.employer_id,
            company_name: job.company_name,
            workers_needed: job.workers_needed,
            work_dates: job.work_dates,
            is_fully_staffed: job.is_fully_staffed,
            is_completed: job.is_completed,
            is_public: job.is_public,
            is_rated: job.is_rated,
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicantView {
    uid: String,
    hired: bool,
    no_show: bool,
    message: String,
    applied_at: String,
}

impl ApplicantView {
    fn new(uid: String, applicant: Applicant) -> Self {
        ApplicantView {
            uid,
            hired: applicant.hired,
            no_show: applicant.no_show,
            message: applicant.message,
            applied_at: applicant.applied_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobDetailsView {
    #[serde(flatten)]
    job: JobView,
    #[serde(skip_serializing_if = "Option::is_none")]
    applicants: Option<Vec<ApplicantView>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    uid: String,
    display_name: String,
    email: String,
    is_admin: bool,
    is_employer: bool,
    pending_employer: bool,
    pending_deletion: bool,
    skills: Vec<String>,
    languages: Vec<String>,
    average_rating: Option<f64>,
    rating_count: u64,
    worked_jobs: Vec<String>,
    no_shows: u32,
}

impl UserView {
    fn new(uid: String, user: User) -> Self {
        UserView {
            uid,
            average_rating: user.average_rating(),
            display_name: user.display_name,
            email: user.email,
            is_admin: user.is_admin,
            is_employer: user.is_employer,
            pending_employer: user.pending_employer,
            pending_deletion: user.pending_deletion,
            skills: user.skills,
            languages: user.languages,
            rating_count: user.rating_count,
            worked_jobs: user.worked_jobs,
            no_shows: user.no_shows,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RatingView {
    id: String,
    job_id: String,
    rated_by: String,
    rated_user: String,
    rating: u8,
    review: String,
    is_employer_rating: bool,
    created_at: String,
}

impl RatingView {
    fn new(id: String, rating: Rating) -> Self {
        RatingView {
            id,
            job_id: rating.job_id,
            rated_by: rating.rated_by,
            rated_user: rating.rated_user,
            rating: rating.rating,
            review: rating.review,
            is_employer_rating: rating.is_employer_rating,
            created_at: rating.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationView {
    id: String,
    kind: NotificationKind,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    broadcast_id: Option<String>,
    is_history: bool,
    created_at: String,
}

impl NotificationView {
    fn new(id: String, notification: Notification) -> Self {
        NotificationView {
            id,
            kind: notification.kind,
            body: notification.body,
            job_id: notification.job_id,
            broadcast_id: notification.broadcast_id,
            is_history: notification.is_history,
            created_at: notification.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatView {
    id: String,
    job_id: String,
    applicant_id: String,
    employer_id: String,
    applicant_name: String,
    company_name: String,
    created_at: String,
}

impl ChatView {
    fn new(id: String, chat: JobChat) -> Self {
        ChatView {
            id,
            job_id: chat.job_id,
            applicant_id: chat.applicant_id,
            employer_id: chat.employer_id,
            applicant_name: chat.applicant_name,
            company_name: chat.company_name,
            created_at: chat.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    id: String,
    text: String,
    sender_id: String,
    recipient_id: String,
    read: bool,
    sent_at: String,
}

impl MessageView {
    fn new(id: String, message: ChatMessage) -> Self {
        MessageView {
            id,
            text: message.text,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            read: message.read,
            sent_at: message.sent_at.to_rfc3339(),
        }
    }
}

// ---- request bodies ----

#[derive(Deserialize)]
struct ApplyBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct HiredBody {
    hired: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaffingBody {
    fully_staffed: bool,
}

#[derive(Deserialize)]
struct MessageBody {
    text: String,
}

#[derive(Deserialize)]
struct BroadcastBody {
    body: String,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct FeedbackBody {
    body: String,
}

#[derive(Deserialize)]
struct NotificationsQuery {
    #[serde(default)]
    history: bool,
}

// ---- users ----

async fn put_me(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(update): Json<ProfileUpdate>,
) -> WebResult<Json<UserView>> {
    let db = state.db().await.log_error_internal()?;
    let user = workflows::upsert_profile(&*db, bearer.token(), update)
        .await
        .or_status()?;
    Ok(Json(UserView::new(bearer.token().to_string(), user)))
}

async fn get_user(
    Extension(state): Extension<ServerState>,
    Path(uid): Path<String>,
) -> WebResult<Json<UserView>> {
    let db = state.db().await.log_error_internal()?;
    let user = workflows::user_profile(&*db, &uid).await.or_status()?;
    Ok(Json(UserView::new(uid, user)))
}

async fn get_user_ratings(
    Extension(state): Extension<ServerState>,
    Path(uid): Path<String>,
) -> WebResult<Json<Vec<RatingView>>> {
    let db = state.db().await.log_error_internal()?;
    let ratings = workflows::user_ratings(&*db, &uid).await.or_status()?;
    Ok(Json(
        ratings
            .into_iter()
            .map(|(id, r)| RatingView::new(id, r))
            .collect(),
    ))
}

async fn employer_request(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::request_employer(&*db, bearer.token())
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deletion_request(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::request_deletion(&*db, bearer.token())
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- jobs ----

async fn create_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(draft): Json<JobDraft>,
) -> WebResult<Json<JobView>> {
    let db = state.db().await.log_error_internal()?;
    let (id, job) = workflows::post_job(&*db, bearer.token(), draft)
        .await
        .or_status()?;
    Ok(Json(JobView::new(id, job)))
}

async fn list_jobs(Extension(state): Extension<ServerState>) -> WebResult<Json<Vec<JobView>>> {
    let db = state.db().await.log_error_internal()?;
    let jobs = workflows::public_jobs(&*db).await.or_status()?;
    Ok(Json(
        jobs.into_iter().map(|(id, j)| JobView::new(id, j)).collect(),
    ))
}

async fn my_jobs(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> WebResult<Json<Vec<JobView>>> {
    let db = state.db().await.log_error_internal()?;
    let jobs = workflows::employer_jobs(&*db, bearer.token())
        .await
        .or_status()?;
    Ok(Json(
        jobs.into_iter().map(|(id, j)| JobView::new(id, j)).collect(),
    ))
}

async fn get_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
) -> WebResult<Json<JobDetailsView>> {
    let db = state.db().await.log_error_internal()?;
    let (job, applicants) = workflows::job_details(&*db, bearer.token(), &job_id)
        .await
        .or_status()?;
    Ok(Json(JobDetailsView {
        job: JobView::new(job_id, job),
        applicants: applicants.map(|list| {
            list.into_iter()
                .map(|(uid, a)| ApplicantView::new(uid, a))
                .collect()
        }),
    }))
}

async fn patch_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> WebResult<Json<JobView>> {
    let db = state.db().await.log_error_internal()?;
    let job = workflows::edit_job(&*db, bearer.token(), &job_id, patch)
        .await
        .or_status()?;
    Ok(Json(JobView::new(job_id, job)))
}

async fn remove_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::delete_job(&*db, bearer.token(), &job_id)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn apply_to_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
    Json(body): Json<ApplyBody>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::apply(&*db, bearer.token(), &job_id, body.message)
        .await
        .or_status()?;
    Ok(StatusCode::CREATED)
}

async fn set_hired(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path((job_id, worker)): Path<(String, String)>,
    Json(body): Json<HiredBody>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::set_hired(&*db, bearer.token(), &job_id, &worker, body.hired)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_staffing(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
    Json(body): Json<StaffingBody>,
) -> WebResult<Json<JobView>> {
    let db = state.db().await.log_error_internal()?;
    let job = workflows::set_staffing(&*db, bearer.token(), &job_id, body.fully_staffed)
        .await
        .or_status()?;
    Ok(Json(JobView::new(job_id, job)))
}

async fn complete_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
) -> WebResult<Json<JobView>> {
    let db = state.db().await.log_error_internal()?;
    let job = workflows::complete_job(&*db, bearer.token(), &job_id)
        .await
        .or_status()?;
    Ok(Json(JobView::new(job_id, job)))
}

#[derive(Serialize)]
struct RatingOutcome {
    created: bool,
}

async fn rate_job(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(job_id): Path<String>,
    Json(submission): Json<RatingSubmission>,
) -> WebResult<Json<RatingOutcome>> {
    let db = state.db().await.log_error_internal()?;
    let created = workflows::submit_rating(&*db, bearer.token(), &job_id, submission)
        .await
        .or_status()?;
    Ok(Json(RatingOutcome { created }))
}

async fn mark_no_show(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path((job_id, worker)): Path<(String, String)>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::mark_no_show(&*db, bearer.token(), &job_id, &worker)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- notifications ----

async fn list_notifications(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<NotificationsQuery>,
) -> WebResult<Json<Vec<NotificationView>>> {
    let db = state.db().await.log_error_internal()?;
    let list = workflows::notifications(&*db, bearer.token(), query.history)
        .await
        .or_status()?;
    Ok(Json(
        list.into_iter()
            .map(|(id, n)| NotificationView::new(id, n))
            .collect(),
    ))
}

async fn archive_notification(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<String>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::archive_notification(&*db, bearer.token(), &id)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_notification(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<String>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::delete_notification(&*db, bearer.token(), &id)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- chat ----

async fn list_chats(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> WebResult<Json<Vec<ChatView>>> {
    let db = state.db().await.log_error_internal()?;
    let chats = workflows::my_chats(&*db, bearer.token()).await.or_status()?;
    Ok(Json(
        chats
            .into_iter()
            .map(|(id, c)| ChatView::new(id, c))
            .collect(),
    ))
}

async fn send_message(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path((job_id, applicant_id)): Path<(String, String)>,
    Json(body): Json<MessageBody>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::send_message(&*db, bearer.token(), &job_id, &applicant_id, body.text)
        .await
        .or_status()?;
    Ok(StatusCode::CREATED)
}

async fn list_messages(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path((job_id, applicant_id)): Path<(String, String)>,
) -> WebResult<Json<Vec<MessageView>>> {
    let db = state.db().await.log_error_internal()?;
    let messages = workflows::chat_messages(&*db, bearer.token(), &job_id, &applicant_id)
        .await
        .or_status()?;
    Ok(Json(
        messages
            .into_iter()
            .map(|(id, m)| MessageView::new(id, m))
            .collect(),
    ))
}

async fn remove_chat(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path((job_id, applicant_id)): Path<(String, String)>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::remove_chat(&*db, bearer.token(), &job_id, &applicant_id)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- admin ----

async fn admin_pending(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> WebResult<Json<Vec<UserView>>> {
    let db = state.db().await.log_error_internal()?;
    let pending = workflows::pending_users(&*db, bearer.token())
        .await
        .or_status()?;
    Ok(Json(
        pending
            .into_iter()
            .map(|(uid, u)| UserView::new(uid, u))
            .collect(),
    ))
}

async fn approve_employer(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(uid): Path<String>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::approve_employer(&*db, bearer.token(), &uid)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn approve_deletion(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(uid): Path<String>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::approve_deletion(&*db, bearer.token(), &uid)
        .await
        .or_status()?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct BroadcastOutcome {
    reached: usize,
}

async fn send_broadcast(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(body): Json<BroadcastBody>,
) -> WebResult<Json<BroadcastOutcome>> {
    let db = state.db().await.log_error_internal()?;
    let reached = workflows::broadcast(&*db, bearer.token(), body.body, body.key)
        .await
        .or_status()?;
    Ok(Json(BroadcastOutcome { reached }))
}

async fn send_feedback(
    Extension(state): Extension<ServerState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(body): Json<FeedbackBody>,
) -> WebResult<StatusCode> {
    let db = state.db().await.log_error_internal()?;
    workflows::submit_feedback(&*db, bearer.token(), body.body)
        .await
        .or_status()?;
    Ok(StatusCode::CREATED)
}

pub async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let port: u16 = if let Some(port) = port {
        port
    } else if let Ok(port) = std::env::var("PORT") {
        port.parse()?
    } else {
        8080
    };

    let state = ServerState::new().await;

    let app = Router::new()
        .route("/", get(status))
        .route("/users/me", put(put_me))
        .route("/users/me/employer-request", post(employer_request))
        .route("/users/me/deletion-request", post(deletion_request))
        .route("/users/:uid", get(get_user))
        .route("/users/:uid/ratings", get(get_user_ratings))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/my/jobs", get(my_jobs))
        .route(
            "/jobs/:job_id",
            get(get_job).patch(patch_job).delete(remove_job),
        )
        .route("/jobs/:job_id/applications", post(apply_to_job))
        .route("/jobs/:job_id/applicants/:uid/hired", post(set_hired))
        .route("/jobs/:job_id/applicants/:uid/no-show", post(mark_no_show))
        .route("/jobs/:job_id/staffing", post(set_staffing))
        .route("/jobs/:job_id/complete", post(complete_job))
        .route("/jobs/:job_id/ratings", post(rate_job))
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/archive", post(archive_notification))
        .route("/notifications/:id", delete(remove_notification))
        .route("/chats", get(list_chats))
        .route(
            "/chats/:job_id/:applicant_id",
            delete(remove_chat),
        )
        .route(
            "/chats/:job_id/:applicant_id/messages",
            get(list_messages).post(send_message),
        )
        .route("/admin/pending", get(admin_pending))
        .route("/admin/users/:uid/approve-employer", post(approve_employer))
        .route("/admin/users/:uid/approve-deletion", post(approve_deletion))
        .route("/admin/broadcasts", post(send_broadcast))
        .route("/feedback", post(send_feedback))
        .layer(AddExtensionLayer::new(state))
        .layer(layer_fn(|inner| {
            RateLimiterMiddleware::new(inner, Quota::per_minute(nonzero!(240u32)))
        }))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
