//! Business operations.
//!
//! Each marketplace operation (post, apply, hire, complete, rate, ...) has
//! exactly one entry point here, which runs the lifecycle guards first and
//! then performs its writes through the [`Store`] traits. Idempotency comes
//! from deterministic document ids plus create-if-absent writes: a retried
//! application or rating collides with its earlier self instead of stacking.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::lifecycle::{self, LifecycleError, RatingDirection};
use crate::model::{
    chat_key, rating_key, AcceptedJob, Applicant, Broadcast, ChatMessage, Feedback, Job, JobChat,
    Notification, NotificationKind, Rating, User,
};
use crate::store::Store;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("invalid request: {0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Guard(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

type Result<T> = std::result::Result<T, WorkflowError>;

/// Resolves the acting user and enforces that a user who has requested
/// deletion can no longer mutate anything while the request sits in the
/// admin queue.
async fn actor<S: Store + ?Sized>(store: &S, uid: &str) -> Result<User> {
    let user = store
        .user(uid)
        .await?
        .ok_or(WorkflowError::NotFound("user"))?;
    if user.pending_deletion {
        return Err(WorkflowError::Forbidden("account is pending deletion"));
    }
    Ok(user)
}

async fn require_admin<S: Store + ?Sized>(store: &S, uid: &str) -> Result<User> {
    let user = actor(store, uid).await?;
    if !user.is_admin {
        return Err(WorkflowError::Forbidden("admin only"));
    }
    Ok(user)
}

async fn job_of<S: Store + ?Sized>(store: &S, job_id: &str) -> Result<Job> {
    store
        .job(job_id)
        .await?
        .ok_or(WorkflowError::NotFound("job"))
}

fn require_owner(job: &Job, uid: &str, user: &User) -> Result<()> {
    if job.employer_id != uid && !user.is_admin {
        return Err(WorkflowError::Forbidden("not the employer of this job"));
    }
    Ok(())
}

/// Fresh document id. The process-wide counter keeps two ids distinct even
/// when they are minted within the same nanosecond.
fn doc_id(prefix: &str, now: DateTime<Utc>) -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}:{}:{}", prefix, now.timestamp_nanos(), seq)
}

async fn notify<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    kind: NotificationKind,
    body: String,
    job_id: Option<String>,
    broadcast_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = doc_id(
        job_id.as_deref().or_else(|| broadcast_id.as_deref()).unwrap_or("system"),
        now,
    );
    let notification = Notification {
        kind,
        body,
        job_id,
        broadcast_id,
        is_history: false,
        created_at: now,
    };
    store.push_notification(uid, &id, &notification).await?;
    Ok(())
}

// ---- users ----

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// First-login upsert: creates the user document if the hosted-auth uid has
/// never been seen, otherwise updates the profile fields without touching
/// flags or aggregates.
pub async fn upsert_profile<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    update: ProfileUpdate,
) -> Result<User> {
    if update.display_name.trim().is_empty() {
        return Err(WorkflowError::Invalid("displayName must not be empty"));
    }
    let mut user = store.user(uid).await?.unwrap_or_else(|| User {
        display_name: String::new(),
        email: String::new(),
        is_admin: false,
        is_employer: false,
        pending_employer: false,
        pending_deletion: false,
        skills: Vec::new(),
        languages: Vec::new(),
        rating_sum: 0,
        rating_count: 0,
        worked_jobs: Vec::new(),
        no_shows: 0,
        created_at: Utc::now(),
    });
    if user.pending_deletion {
        return Err(WorkflowError::Forbidden("account is pending deletion"));
    }
    user.display_name = update.display_name;
    user.email = update.email;
    user.skills = update.skills;
    user.languages = update.languages;
    store.put_user(uid, &user).await?;
    Ok(user)
}

pub async fn user_profile<S: Store + ?Sized>(store: &S, uid: &str) -> Result<User> {
    store
        .user(uid)
        .await?
        .ok_or(WorkflowError::NotFound("user"))
}

pub async fn user_ratings<S: Store + ?Sized>(
    store: &S,
    uid: &str,
) -> Result<Vec<(String, Rating)>> {
    let mut ratings: Vec<_> = store
        .ratings()
        .await?
        .into_iter()
        .filter(|(_, r)| r.rated_user == uid)
        .collect();
    ratings.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(ratings)
}

pub async fn request_employer<S: Store + ?Sized>(store: &S, uid: &str) -> Result<()> {
    let mut user = actor(store, uid).await?;
    if user.is_employer {
        return Err(WorkflowError::Invalid("already an employer"));
    }
    user.pending_employer = true;
    store.put_user(uid, &user).await?;
    Ok(())
}

pub async fn request_deletion<S: Store + ?Sized>(store: &S, uid: &str) -> Result<()> {
    let mut user = actor(store, uid).await?;
    user.pending_deletion = true;
    store.put_user(uid, &user).await?;
    Ok(())
}

// ---- jobs ----

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    pub location: String,
    pub salary: String,
    pub job_type: String,
    pub company_name: String,
    pub workers_needed: u32,
    #[serde(default)]
    pub work_dates: Vec<String>,
}

pub async fn post_job<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    draft: JobDraft,
) -> Result<(String, Job)> {
    let user = actor(store, uid).await?;
    if !user.is_employer {
        return Err(WorkflowError::Forbidden("only employers can post jobs"));
    }
    if draft.title.trim().is_empty() {
        return Err(WorkflowError::Invalid("title must not be empty"));
    }
    if draft.workers_needed == 0 {
        return Err(WorkflowError::Invalid("workersNeeded must be at least 1"));
    }

    let now = Utc::now();
    let job = Job {
        title: draft.title,
        description: draft.description,
        location: draft.location,
        salary: draft.salary,
        job_type: draft.job_type,
        employer_id: uid.to_string(),
        company_name: draft.company_name,
        workers_needed: draft.workers_needed,
        work_dates: draft.work_dates,
        is_fully_staffed: false,
        is_completed: false,
        is_public: true,
        is_rated: false,
        was_public: None,
        created_at: now,
    };
    let job_id = doc_id(uid, now);
    if !store.create_job(&job_id, &job).await? {
        return Err(WorkflowError::Invalid("job id collision, retry"));
    }
    Ok((job_id, job))
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    pub workers_needed: Option<u32>,
    pub work_dates: Option<Vec<String>>,
}

pub async fn edit_job<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    patch: JobPatch,
) -> Result<Job> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let mut job = job_of(store, job_id).await?;
    require_owner(&job, uid, &user)?;

    let hired = lifecycle::hired_count(&store.applicants(job_id).await?);
    let new_workers = patch.workers_needed.unwrap_or(job.workers_needed);
    if new_workers == 0 {
        return Err(WorkflowError::Invalid("workersNeeded must be at least 1"));
    }
    lifecycle::ensure_can_edit(&job, new_workers, hired)?;

    if let Some(title) = patch.title {
        job.title = title;
    }
    if let Some(description) = patch.description {
        job.description = description;
    }
    if let Some(location) = patch.location {
        job.location = location;
    }
    if let Some(salary) = patch.salary {
        job.salary = salary;
    }
    if let Some(job_type) = patch.job_type {
        job.job_type = job_type;
    }
    if let Some(work_dates) = patch.work_dates {
        job.work_dates = work_dates;
    }
    job.workers_needed = new_workers;

    store.put_job(job_id, &job).await?;
    Ok(job)
}

/// Permanent delete, cascading everything hanging off the job: applicants,
/// the hired workers' denormalized records, and any chats with their
/// messages.
pub async fn delete_job<S: Store + ?Sized>(store: &S, uid: &str, job_id: &str) -> Result<()> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let job = job_of(store, job_id).await?;
    require_owner(&job, uid, &user)?;

    for (worker, applicant) in store.applicants(job_id).await? {
        if applicant.hired {
            store.delete_accepted_job(&worker, job_id).await?;
        }
    }
    store.delete_applicants(job_id).await?;

    for (chat_id, chat) in store.chats().await? {
        if chat.job_id == job_id {
            store.delete_messages(&chat_id).await?;
            store.delete_chat(&chat_id).await?;
        }
    }

    store.delete_job(job_id).await?;
    Ok(())
}

pub async fn public_jobs<S: Store + ?Sized>(store: &S) -> Result<Vec<(String, Job)>> {
    let mut jobs: Vec<_> = store
        .jobs()
        .await?
        .into_iter()
        .filter(|(_, j)| lifecycle::ensure_can_apply(j).is_ok())
        .collect();
    jobs.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(jobs)
}

pub async fn employer_jobs<S: Store + ?Sized>(
    store: &S,
    uid: &str,
) -> Result<Vec<(String, Job)>> {
    let mut jobs: Vec<_> = store
        .jobs()
        .await?
        .into_iter()
        .filter(|(_, j)| j.employer_id == uid)
        .collect();
    jobs.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(jobs)
}

/// The applicant list is only disclosed to the job's owner (or an admin).
pub async fn job_details<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
) -> Result<(Job, Option<Vec<(String, Applicant)>>)> {
    let job = job_of(store, job_id).await?;
    let is_owner = job.employer_id == uid
        || matches!(store.user(uid).await?, Some(u) if u.is_admin);
    let applicants = if is_owner {
        Some(store.applicants(job_id).await?)
    } else {
        None
    };
    Ok((job, applicants))
}

// ---- applications & hiring ----

pub async fn apply<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    message: String,
) -> Result<()> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let job = job_of(store, job_id).await?;
    if job.employer_id == uid {
        return Err(WorkflowError::Invalid("cannot apply to your own job"));
    }
    lifecycle::ensure_can_apply(&job)?;

    let now = Utc::now();
    let applicant = Applicant {
        hired: false,
        no_show: false,
        message,
        applied_at: now,
    };
    if !store.create_applicant(job_id, uid, &applicant).await? {
        return Err(LifecycleError::AlreadyApplied.into());
    }

    notify(
        store,
        &job.employer_id,
        NotificationKind::Applied,
        format!("{} applied to {}", user.display_name, job.title),
        Some(job_id.to_string()),
        None,
        now,
    )
    .await
}

/// Hire or un-hire one applicant. The applicant flag, the denormalized
/// `acceptedJobs` record and the notification are all written by this one
/// path, in both directions, so they cannot drift apart.
pub async fn set_hired<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    worker: &str,
    hired: bool,
) -> Result<()> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let job = job_of(store, job_id).await?;
    require_owner(&job, uid, &user)?;

    let mut applicant = store
        .applicant(job_id, worker)
        .await?
        .ok_or(WorkflowError::NotFound("applicant"))?;

    let now = Utc::now();
    if hired {
        let count = lifecycle::hired_count(&store.applicants(job_id).await?);
        lifecycle::ensure_can_hire(&job, &applicant, count)?;

        applicant.hired = true;
        store.put_applicant(job_id, worker, &applicant).await?;
        let record = AcceptedJob {
            job_title: job.title.clone(),
            company_name: job.company_name.clone(),
            employer_id: job.employer_id.clone(),
            hired_at: now,
        };
        store.create_accepted_job(worker, job_id, &record).await?;
        notify(
            store,
            worker,
            NotificationKind::Hired,
            format!("You were hired for {}", job.title),
            Some(job_id.to_string()),
            None,
            now,
        )
        .await
    } else {
        lifecycle::ensure_can_unhire(&job, &applicant)?;

        applicant.hired = false;
        store.put_applicant(job_id, worker, &applicant).await?;
        store.delete_accepted_job(worker, job_id).await?;
        notify(
            store,
            worker,
            NotificationKind::Unhired,
            format!("Your hire for {} was withdrawn", job.title),
            Some(job_id.to_string()),
            None,
            now,
        )
        .await
    }
}

pub async fn set_staffing<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    fully_staffed: bool,
) -> Result<Job> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let mut job = job_of(store, job_id).await?;
    require_owner(&job, uid, &user)?;

    lifecycle::set_staffing(&mut job, fully_staffed)?;
    store.put_job(job_id, &job).await?;
    Ok(job)
}

// ---- completion, ratings, no-shows ----

pub async fn complete_job<S: Store + ?Sized>(store: &S, uid: &str, job_id: &str) -> Result<Job> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let mut job = job_of(store, job_id).await?;
    require_owner(&job, uid, &user)?;

    let applicants = store.applicants(job_id).await?;
    lifecycle::complete(&mut job, lifecycle::hired_count(&applicants))?;
    store.put_job(job_id, &job).await?;

    let now = Utc::now();
    for (worker, applicant) in applicants {
        if !applicant.hired {
            continue;
        }
        if let Some(mut worked) = store.user(&worker).await? {
            if !worked.worked_jobs.iter().any(|j| j == job_id) {
                worked.worked_jobs.push(job_id.to_string());
                store.put_user(&worker, &worked).await?;
            }
        }
        notify(
            store,
            &worker,
            NotificationKind::JobCompleted,
            format!("{} was marked completed, you can now rate the employer", job.title),
            Some(job_id.to_string()),
            None,
            now,
        )
        .await?;
    }
    Ok(job)
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RatingSubmission {
    pub rated_user: String,
    pub rating: u8,
    #[serde(default)]
    pub review: String,
}

/// Returns `false` when the identical submission was already recorded; the
/// aggregate is only touched when the rating document was actually created,
/// so a double-click contributes exactly once to the average.
pub async fn submit_rating<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    submission: RatingSubmission,
) -> Result<bool> {
    actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let mut job = job_of(store, job_id).await?;

    let hired: Vec<String> = store
        .applicants(job_id)
        .await?
        .into_iter()
        .filter(|(_, a)| a.hired)
        .map(|(worker, _)| worker)
        .collect();
    let direction =
        lifecycle::rating_direction(&job, uid, &submission.rated_user, submission.rating, &hired)?;

    let now = Utc::now();
    let rating = Rating {
        job_id: job_id.to_string(),
        rated_by: uid.to_string(),
        rated_user: submission.rated_user.clone(),
        rating: submission.rating,
        review: submission.review,
        is_employer_rating: direction == RatingDirection::EmployerRatesWorker,
        created_at: now,
    };
    let key = rating_key(job_id, uid, &submission.rated_user);
    if !store.create_rating(&key, &rating).await? {
        return Ok(false);
    }

    let mut rated = store
        .user(&submission.rated_user)
        .await?
        .ok_or(WorkflowError::NotFound("rated user"))?;
    rated.rating_sum += submission.rating as u64;
    rated.rating_count += 1;
    store.put_user(&submission.rated_user, &rated).await?;

    if direction == RatingDirection::EmployerRatesWorker {
        let rated_workers: Vec<String> = store
            .ratings()
            .await?
            .into_iter()
            .filter(|(_, r)| r.job_id == job_id && r.is_employer_rating)
            .map(|(_, r)| r.rated_user)
            .collect();
        if hired.iter().all(|w| rated_workers.contains(w)) {
            lifecycle::mark_rated(&mut job);
            store.put_job(job_id, &job).await?;
        }
    }
    Ok(true)
}

/// The no-show flag lives on the applicant document, so marking the same
/// worker twice is rejected and the counter moves exactly once.
pub async fn mark_no_show<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    worker: &str,
) -> Result<()> {
    let user = actor(store, uid).await?;
    let _guard = store.lock_job(job_id).await;
    let job = job_of(store, job_id).await?;
    require_owner(&job, uid, &user)?;

    let mut applicant = store
        .applicant(job_id, worker)
        .await?
        .ok_or(WorkflowError::NotFound("applicant"))?;
    lifecycle::ensure_can_mark_no_show(&job, &applicant)?;

    applicant.no_show = true;
    store.put_applicant(job_id, worker, &applicant).await?;

    if let Some(mut marked) = store.user(worker).await? {
        marked.no_shows += 1;
        store.put_user(worker, &marked).await?;
    }

    notify(
        store,
        worker,
        NotificationKind::NoShow,
        format!("You were marked as a no-show for {}", job.title),
        Some(job_id.to_string()),
        None,
        Utc::now(),
    )
    .await
}

// ---- notifications ----

pub async fn notifications<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    history: bool,
) -> Result<Vec<(String, Notification)>> {
    let mut list: Vec<_> = store
        .notifications(uid)
        .await?
        .into_iter()
        .filter(|(_, n)| n.is_history == history)
        .collect();
    list.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(list)
}

pub async fn archive_notification<S: Store + ?Sized>(store: &S, uid: &str, id: &str) -> Result<()> {
    let mut notification = store
        .notification(uid, id)
        .await?
        .ok_or(WorkflowError::NotFound("notification"))?;
    notification.is_history = true;
    store.put_notification(uid, id, &notification).await?;
    Ok(())
}

pub async fn delete_notification<S: Store + ?Sized>(store: &S, uid: &str, id: &str) -> Result<()> {
    store
        .notification(uid, id)
        .await?
        .ok_or(WorkflowError::NotFound("notification"))?;
    store.delete_notification(uid, id).await?;
    Ok(())
}

// ---- chat ----

fn chat_recipient(chat: &JobChat, sender: &str) -> Result<String> {
    if sender == chat.employer_id {
        Ok(chat.applicant_id.clone())
    } else if sender == chat.applicant_id {
        Ok(chat.employer_id.clone())
    } else {
        Err(WorkflowError::Forbidden("not a party to this chat"))
    }
}

/// Chats are created lazily on the first message, like the original; the
/// deterministic `{jobId}:{applicantId}` key means both sides lazily create
/// the same chat.
pub async fn send_message<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    applicant_id: &str,
    text: String,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(WorkflowError::Invalid("message must not be empty"));
    }
    let sender = actor(store, uid).await?;
    let job = job_of(store, job_id).await?;
    if uid != job.employer_id && uid != applicant_id {
        return Err(WorkflowError::Forbidden("not a party to this chat"));
    }
    store
        .applicant(job_id, applicant_id)
        .await?
        .ok_or(WorkflowError::NotFound("applicant"))?;

    let now = Utc::now();
    let id = chat_key(job_id, applicant_id);
    let applicant_name = if uid == applicant_id {
        sender.display_name.clone()
    } else {
        match store.user(applicant_id).await? {
            Some(u) => u.display_name,
            None => String::new(),
        }
    };
    let chat = JobChat {
        job_id: job_id.to_string(),
        applicant_id: applicant_id.to_string(),
        employer_id: job.employer_id.clone(),
        applicant_name,
        company_name: job.company_name.clone(),
        created_at: now,
    };
    store.create_chat(&id, &chat).await?;

    let recipient = chat_recipient(&chat, uid)?;
    let message = ChatMessage {
        text,
        sender_id: uid.to_string(),
        recipient_id: recipient.clone(),
        read: false,
        sent_at: now,
    };
    store.create_message(&id, &doc_id(uid, now), &message).await?;

    notify(
        store,
        &recipient,
        NotificationKind::ChatMessage,
        format!("New message from {}", sender.display_name),
        Some(job_id.to_string()),
        None,
        now,
    )
    .await
}

/// Reading a chat also marks the caller's unread messages as read.
pub async fn chat_messages<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    applicant_id: &str,
) -> Result<Vec<(String, ChatMessage)>> {
    let id = chat_key(job_id, applicant_id);
    let chat = store
        .chat(&id)
        .await?
        .ok_or(WorkflowError::NotFound("chat"))?;
    chat_recipient(&chat, uid)?;

    let mut messages = store.messages(&id).await?;
    messages.sort_by(|a, b| a.1.sent_at.cmp(&b.1.sent_at));
    for (message_id, message) in messages.iter_mut() {
        if message.recipient_id == uid && !message.read {
            message.read = true;
            store.put_message(&id, message_id, message).await?;
        }
    }
    Ok(messages)
}

pub async fn my_chats<S: Store + ?Sized>(store: &S, uid: &str) -> Result<Vec<(String, JobChat)>> {
    let mut chats: Vec<_> = store
        .chats()
        .await?
        .into_iter()
        .filter(|(_, c)| c.employer_id == uid || c.applicant_id == uid)
        .collect();
    chats.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(chats)
}

/// Either party may remove the chat; messages go with it.
pub async fn remove_chat<S: Store + ?Sized>(
    store: &S,
    uid: &str,
    job_id: &str,
    applicant_id: &str,
) -> Result<()> {
    let id = chat_key(job_id, applicant_id);
    let chat = store
        .chat(&id)
        .await?
        .ok_or(WorkflowError::NotFound("chat"))?;
    chat_recipient(&chat, uid)?;

    store.delete_messages(&id).await?;
    store.delete_chat(&id).await?;
    Ok(())
}

// ---- admin ----

pub async fn pending_users<S: Store + ?Sized>(
    store: &S,
    admin_uid: &str,
) -> Result<Vec<(String, User)>> {
    require_admin(store, admin_uid).await?;
    Ok(store
        .users()
        .await?
        .into_iter()
        .filter(|(_, u)| u.pending_employer || u.pending_deletion)
        .collect())
}

pub async fn approve_employer<S: Store + ?Sized>(
    store: &S,
    admin_uid: &str,
    uid: &str,
) -> Result<()> {
    require_admin(store, admin_uid).await?;
    let mut user = store
        .user(uid)
        .await?
        .ok_or(WorkflowError::NotFound("user"))?;
    if !user.pending_employer {
        return Err(WorkflowError::Invalid("no pending employer request"));
    }
    user.is_employer = true;
    user.pending_employer = false;
    store.put_user(uid, &user).await?;

    notify(
        store,
        uid,
        NotificationKind::EmployerApproved,
        "Your employer request was approved".to_string(),
        None,
        None,
        Utc::now(),
    )
    .await
}

pub async fn approve_deletion<S: Store + ?Sized>(
    store: &S,
    admin_uid: &str,
    uid: &str,
) -> Result<()> {
    require_admin(store, admin_uid).await?;
    let user = store
        .user(uid)
        .await?
        .ok_or(WorkflowError::NotFound("user"))?;
    if !user.pending_deletion {
        return Err(WorkflowError::Invalid("no pending deletion request"));
    }
    store.delete_user(uid).await?;
    Ok(())
}

/// Stores the broadcast and fans one notification out per user. Returns the
/// number of users reached.
/// A client-supplied `key` makes the whole broadcast retryable: the
/// broadcast document and every fanned-out notification use an id derived
/// from it, so a resend collides with the first attempt per user instead of
/// delivering twice. Without a key each call is a fresh broadcast.
pub async fn broadcast<S: Store + ?Sized>(
    store: &S,
    admin_uid: &str,
    body: String,
    key: Option<String>,
) -> Result<usize> {
    require_admin(store, admin_uid).await?;
    if body.trim().is_empty() {
        return Err(WorkflowError::Invalid("broadcast must not be empty"));
    }

    let now = Utc::now();
    let broadcast_id = match key {
        Some(k) => format!("{}:{}", admin_uid, k),
        None => doc_id(admin_uid, now),
    };
    let record = Broadcast {
        sent_by: admin_uid.to_string(),
        body: body.clone(),
        created_at: now,
    };
    store.create_broadcast(&broadcast_id, &record).await?;

    let mut reached = 0;
    for (uid, _) in store.users().await? {
        let notification = Notification {
            kind: NotificationKind::Broadcast,
            body: body.clone(),
            job_id: None,
            broadcast_id: Some(broadcast_id.clone()),
            is_history: false,
            created_at: now,
        };
        store
            .push_notification(&uid, &broadcast_id, &notification)
            .await?;
        reached += 1;
    }
    Ok(reached)
}

pub async fn submit_feedback<S: Store + ?Sized>(store: &S, uid: &str, body: String) -> Result<()> {
    actor(store, uid).await?;
    if body.trim().is_empty() {
        return Err(WorkflowError::Invalid("feedback must not be empty"));
    }
    let now = Utc::now();
    let feedback = Feedback {
        from_user: uid.to_string(),
        body,
        created_at: now,
    };
    store.create_feedback(&doc_id(uid, now), &feedback).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{JobStore, RatingStore, UserStore};

    async fn seed_user(store: &MemoryStore, uid: &str, employer: bool, admin: bool) {
        let user = User {
            display_name: uid.to_string(),
            email: format!("{}@example.com", uid),
            is_admin: admin,
            is_employer: employer,
            pending_employer: false,
            pending_deletion: false,
            skills: Vec::new(),
            languages: Vec::new(),
            rating_sum: 0,
            rating_count: 0,
            worked_jobs: Vec::new(),
            no_shows: 0,
            created_at: Utc::now(),
        };
        store.put_user(uid, &user).await.unwrap();
    }

    fn draft(workers_needed: u32) -> JobDraft {
        JobDraft {
            title: "Warehouse shift".to_string(),
            description: "Night shift".to_string(),
            location: "Helsinki".to_string(),
            salary: "15e/h".to_string(),
            job_type: "shift".to_string(),
            company_name: "Acme".to_string(),
            workers_needed,
            work_dates: vec!["2021-11-02".to_string()],
        }
    }

    async fn setup(workers_needed: u32) -> (MemoryStore, String) {
        let store = MemoryStore::new();
        seed_user(&store, "emp", true, false).await;
        seed_user(&store, "w1", false, false).await;
        seed_user(&store, "w2", false, false).await;
        let (job_id, _) = post_job(&store, "emp", draft(workers_needed)).await.unwrap();
        (store, job_id)
    }

    #[test]
    fn document_ids_differ_even_for_the_same_instant() {
        let now = Utc::now();
        assert_ne!(doc_id("job-1", now), doc_id("job-1", now));
    }

    #[tokio::test]
    async fn only_employers_can_post() {
        let store = MemoryStore::new();
        seed_user(&store, "w1", false, false).await;
        let err = post_job(&store, "w1", draft(1)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[tokio::test]
    async fn duplicate_application_is_rejected() {
        let (store, job_id) = setup(2).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        let err = apply(&store, "w1", &job_id, "hi again".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::AlreadyApplied)
        ));
    }

    #[tokio::test]
    async fn fully_staffed_job_rejects_applications() {
        let (store, job_id) = setup(2).await;
        set_staffing(&store, "emp", &job_id, true).await.unwrap();
        let err = apply(&store, "w1", &job_id, "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::FullyStaffed)
        ));
    }

    #[tokio::test]
    async fn second_hire_past_workers_needed_is_rejected() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        apply(&store, "w2", &job_id, "hi".to_string()).await.unwrap();

        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        let err = set_hired(&store, "emp", &job_id, "w2", true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::PositionsFilled(1))
        ));
    }

    #[tokio::test]
    async fn concurrent_hires_cannot_overfill_a_job() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        apply(&store, "w2", &job_id, "hi".to_string()).await.unwrap();

        let (a, b) = tokio::join!(
            set_hired(&store, "emp", &job_id, "w1", true),
            set_hired(&store, "emp", &job_id, "w2", true),
        );
        assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1);
        let loser = a.and(b).unwrap_err();
        assert!(matches!(
            loser,
            WorkflowError::Guard(LifecycleError::PositionsFilled(1))
        ));

        let hired = lifecycle::hired_count(&store.applicants(&job_id).await.unwrap());
        assert_eq!(hired, 1);
    }

    #[tokio::test]
    async fn hiring_waits_for_the_job_lock() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();

        let guard = store.lock_job(&job_id).await;
        let mut task = {
            let store = store.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { set_hired(&store, "emp", &job_id, "w1", true).await })
        };

        // The hire cannot make progress while someone else holds the job.
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), &mut task).await;
        assert!(blocked.is_err(), "hire ran despite the held lock");

        drop(guard);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn hire_then_unhire_leaves_no_orphan_records() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();

        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        assert_eq!(store.accepted_jobs("w1").await.unwrap().len(), 1);

        set_hired(&store, "emp", &job_id, "w1", false).await.unwrap();
        assert!(store.accepted_jobs("w1").await.unwrap().is_empty());
        assert!(!store
            .applicant(&job_id, "w1")
            .await
            .unwrap()
            .unwrap()
            .hired);
    }

    #[tokio::test]
    async fn staffing_toggle_restores_visibility() {
        let (store, job_id) = setup(1).await;
        set_staffing(&store, "emp", &job_id, true).await.unwrap();
        assert!(!store.job(&job_id).await.unwrap().unwrap().is_public);
        set_staffing(&store, "emp", &job_id, false).await.unwrap();
        assert!(store.job(&job_id).await.unwrap().unwrap().is_public);
    }

    #[tokio::test]
    async fn completion_requires_a_hire_and_happens_once() {
        let (store, job_id) = setup(1).await;
        let err = complete_job(&store, "emp", &job_id).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::NoHiredWorkers)
        ));

        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        let job = complete_job(&store, "emp", &job_id).await.unwrap();
        assert!(job.is_completed && !job.is_public);

        let err = complete_job(&store, "emp", &job_id).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::AlreadyCompleted)
        ));

        let worker = store.user("w1").await.unwrap().unwrap();
        assert_eq!(worker.worked_jobs, vec![job_id]);
    }

    #[tokio::test]
    async fn double_rating_counts_once() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        complete_job(&store, "emp", &job_id).await.unwrap();

        let submission = RatingSubmission {
            rated_user: "w1".to_string(),
            rating: 5,
            review: "great".to_string(),
        };
        assert!(submit_rating(&store, "emp", &job_id, submission.clone())
            .await
            .unwrap());
        assert!(!submit_rating(&store, "emp", &job_id, submission)
            .await
            .unwrap());

        assert_eq!(store.ratings().await.unwrap().len(), 1);
        let rated = store.user("w1").await.unwrap().unwrap();
        assert_eq!((rated.rating_sum, rated.rating_count), (5, 1));
        assert_eq!(rated.average_rating(), Some(5.0));
    }

    #[tokio::test]
    async fn average_is_mean_of_all_ratings_regardless_of_direction() {
        let (store, job_a) = setup(2).await;
        apply(&store, "w1", &job_a, "hi".to_string()).await.unwrap();
        apply(&store, "w2", &job_a, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_a, "w1", true).await.unwrap();
        set_hired(&store, "emp", &job_a, "w2", true).await.unwrap();
        complete_job(&store, "emp", &job_a).await.unwrap();

        // Both hired workers rate the employer through the same path the
        // employer uses to rate them.
        for (rater, value) in [("w1", 2u8), ("w2", 5u8)] {
            submit_rating(
                &store,
                rater,
                &job_a,
                RatingSubmission {
                    rated_user: "emp".to_string(),
                    rating: value,
                    review: String::new(),
                },
            )
            .await
            .unwrap();
        }

        let employer = store.user("emp").await.unwrap().unwrap();
        assert_eq!(employer.average_rating(), Some(3.5));
        assert_eq!(user_ratings(&store, "emp").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn job_becomes_rated_once_every_hire_is_rated() {
        let (store, job_id) = setup(2).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        apply(&store, "w2", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        set_hired(&store, "emp", &job_id, "w2", true).await.unwrap();
        complete_job(&store, "emp", &job_id).await.unwrap();

        submit_rating(
            &store,
            "emp",
            &job_id,
            RatingSubmission {
                rated_user: "w1".to_string(),
                rating: 4,
                review: String::new(),
            },
        )
        .await
        .unwrap();
        assert!(!store.job(&job_id).await.unwrap().unwrap().is_rated);

        submit_rating(
            &store,
            "emp",
            &job_id,
            RatingSubmission {
                rated_user: "w2".to_string(),
                rating: 3,
                review: String::new(),
            },
        )
        .await
        .unwrap();
        assert!(store.job(&job_id).await.unwrap().unwrap().is_rated);
    }

    #[tokio::test]
    async fn stranger_cannot_rate() {
        let (store, job_id) = setup(1).await;
        seed_user(&store, "stranger", false, false).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        complete_job(&store, "emp", &job_id).await.unwrap();

        let err = submit_rating(
            &store,
            "stranger",
            &job_id,
            RatingSubmission {
                rated_user: "w1".to_string(),
                rating: 5,
                review: String::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::NotAParty)
        ));
    }

    #[tokio::test]
    async fn no_show_increments_once() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        complete_job(&store, "emp", &job_id).await.unwrap();

        mark_no_show(&store, "emp", &job_id, "w1").await.unwrap();
        let err = mark_no_show(&store, "emp", &job_id, "w1").await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::AlreadyNoShow)
        ));
        assert_eq!(store.user("w1").await.unwrap().unwrap().no_shows, 1);
    }

    #[tokio::test]
    async fn notifications_split_archive_and_delete() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();

        let active = notifications(&store, "emp", false).await.unwrap();
        assert_eq!(active.len(), 1);
        let id = active[0].0.clone();

        archive_notification(&store, "emp", &id).await.unwrap();
        assert!(notifications(&store, "emp", false).await.unwrap().is_empty());
        assert_eq!(notifications(&store, "emp", true).await.unwrap().len(), 1);

        delete_notification(&store, "emp", &id).await.unwrap();
        assert!(notifications(&store, "emp", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_is_created_lazily_and_cascades_on_delete() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();

        send_message(&store, "emp", &job_id, "w1", "when can you start?".to_string())
            .await
            .unwrap();
        send_message(&store, "w1", &job_id, "w1", "tomorrow".to_string())
            .await
            .unwrap();

        let messages = chat_messages(&store, "emp", &job_id, "w1").await.unwrap();
        assert_eq!(messages.len(), 2);
        // Reading as the employer marks the worker's message read.
        assert!(messages.iter().all(|(_, m)| m.recipient_id != "emp" || m.read));

        assert_eq!(my_chats(&store, "w1").await.unwrap().len(), 1);

        remove_chat(&store, "w1", &job_id, "w1").await.unwrap();
        assert!(my_chats(&store, "w1").await.unwrap().is_empty());
        let err = chat_messages(&store, "emp", &job_id, "w1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound("chat")));
    }

    #[tokio::test]
    async fn outsiders_cannot_read_chats() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        send_message(&store, "w1", &job_id, "w1", "hello".to_string())
            .await
            .unwrap();

        let err = chat_messages(&store, "w2", &job_id, "w1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[tokio::test]
    async fn pending_deletion_blocks_mutations() {
        let (store, job_id) = setup(1).await;
        request_deletion(&store, "w1").await.unwrap();
        let err = apply(&store, "w1", &job_id, "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[tokio::test]
    async fn admin_queue_and_employer_approval() {
        let store = MemoryStore::new();
        seed_user(&store, "admin", false, true).await;
        seed_user(&store, "u1", false, false).await;

        request_employer(&store, "u1").await.unwrap();
        let pending = pending_users(&store, "admin").await.unwrap();
        assert_eq!(pending.len(), 1);

        approve_employer(&store, "admin", "u1").await.unwrap();
        let u1 = store.user("u1").await.unwrap().unwrap();
        assert!(u1.is_employer && !u1.pending_employer);

        let err = pending_users(&store, "u1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[tokio::test]
    async fn deletion_approval_removes_the_user() {
        let store = MemoryStore::new();
        seed_user(&store, "admin", false, true).await;
        seed_user(&store, "u1", false, false).await;

        let err = approve_deletion(&store, "admin", "u1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Invalid(_)));

        request_deletion(&store, "u1").await.unwrap();
        approve_deletion(&store, "admin", "u1").await.unwrap();
        assert!(store.user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_user() {
        let store = MemoryStore::new();
        seed_user(&store, "admin", false, true).await;
        seed_user(&store, "u1", false, false).await;
        seed_user(&store, "u2", false, false).await;

        let reached = broadcast(&store, "admin", "maintenance tonight".to_string(), None)
            .await
            .unwrap();
        assert_eq!(reached, 3);
        let got = notifications(&store, "u1", false).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].1.broadcast_id.is_some());
    }

    #[tokio::test]
    async fn keyed_broadcast_retry_delivers_once_per_user() {
        let store = MemoryStore::new();
        seed_user(&store, "admin", false, true).await;
        seed_user(&store, "u1", false, false).await;

        let key = Some("maint-2024-06".to_string());
        broadcast(&store, "admin", "maintenance tonight".to_string(), key.clone())
            .await
            .unwrap();
        broadcast(&store, "admin", "maintenance tonight".to_string(), key)
            .await
            .unwrap();

        for uid in ["admin", "u1"] {
            let got = notifications(&store, uid, false).await.unwrap();
            assert_eq!(got.len(), 1, "{} should see the broadcast once", uid);
        }
    }

    #[tokio::test]
    async fn job_deletion_cascades() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        send_message(&store, "w1", &job_id, "w1", "hello".to_string())
            .await
            .unwrap();

        delete_job(&store, "emp", &job_id).await.unwrap();
        assert!(store.job(&job_id).await.unwrap().is_none());
        assert!(store.applicants(&job_id).await.unwrap().is_empty());
        assert!(store.accepted_jobs("w1").await.unwrap().is_empty());
        assert!(my_chats(&store, "w1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn public_listing_hides_staffed_and_completed_jobs() {
        let (store, job_a) = setup(1).await;
        let (job_b, _) = post_job(&store, "emp", draft(1)).await.unwrap();

        assert_eq!(public_jobs(&store).await.unwrap().len(), 2);
        set_staffing(&store, "emp", &job_a, true).await.unwrap();
        let listed = public_jobs(&store).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, job_b);
    }

    #[tokio::test]
    async fn edit_cannot_undercut_hired_count() {
        let (store, job_id) = setup(2).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        apply(&store, "w2", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        set_hired(&store, "emp", &job_id, "w2", true).await.unwrap();

        let err = edit_job(
            &store,
            "emp",
            &job_id,
            JobPatch {
                workers_needed: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::WorkersNeededBelowHired(2))
        ));
    }

    #[tokio::test]
    async fn completed_job_cannot_be_edited() {
        let (store, job_id) = setup(1).await;
        apply(&store, "w1", &job_id, "hi".to_string()).await.unwrap();
        set_hired(&store, "emp", &job_id, "w1", true).await.unwrap();
        complete_job(&store, "emp", &job_id).await.unwrap();

        let err = edit_job(
            &store,
            "emp",
            &job_id,
            JobPatch {
                title: Some("Rewritten".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Guard(LifecycleError::JobCompleted)
        ));
        assert_eq!(job_of(&store, &job_id).await.unwrap().title, "Warehouse shift");
    }
}
