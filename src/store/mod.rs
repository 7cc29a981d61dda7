//! Per-entity repository traits.
//!
//! Workflows only see these traits, so every business rule runs identically
//! against Firestore and against the in-memory store the tests use. Methods
//! named `create_*` are create-if-absent: they return `false` when a document
//! with that id already exists, which is what apply/rating idempotency hangs
//! off.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::model::{
    AcceptedJob, Applicant, Broadcast, ChatMessage, Feedback, Job, JobChat, Notification, Rating,
    User,
};

pub mod firestore;
pub mod memory;

/// One mutex per job id, shared by every store handle in the process.
/// Workflows that read job state (hired count, lifecycle flags) before
/// writing hold the job's lock across the whole guard-then-write sequence,
/// so two concurrent requests cannot both pass a guard against the same
/// stale snapshot.
#[derive(Default, Clone)]
pub struct JobLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl JobLocks {
    pub async fn acquire(&self, job_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().expect("job lock map poisoned");
            map.entry(job_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Serializes mutations of one job within this process. Held for the
    /// duration of a guard-then-write sequence.
    async fn lock_job(&self, job_id: &str) -> OwnedMutexGuard<()>;

    async fn create_job(&self, id: &str, job: &Job) -> Result<bool>;
    async fn job(&self, id: &str) -> Result<Option<Job>>;
    async fn put_job(&self, id: &str, job: &Job) -> Result<()>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    async fn jobs(&self) -> Result<Vec<(String, Job)>>;

    async fn create_applicant(&self, job_id: &str, uid: &str, applicant: &Applicant)
        -> Result<bool>;
    async fn applicant(&self, job_id: &str, uid: &str) -> Result<Option<Applicant>>;
    async fn put_applicant(&self, job_id: &str, uid: &str, applicant: &Applicant) -> Result<()>;
    async fn applicants(&self, job_id: &str) -> Result<Vec<(String, Applicant)>>;
    async fn delete_applicants(&self, job_id: &str) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user(&self, uid: &str) -> Result<Option<User>>;
    async fn put_user(&self, uid: &str, user: &User) -> Result<()>;
    async fn delete_user(&self, uid: &str) -> Result<()>;
    async fn users(&self) -> Result<Vec<(String, User)>>;

    async fn create_accepted_job(&self, uid: &str, job_id: &str, record: &AcceptedJob)
        -> Result<bool>;
    async fn delete_accepted_job(&self, uid: &str, job_id: &str) -> Result<()>;
    async fn accepted_jobs(&self, uid: &str) -> Result<Vec<(String, AcceptedJob)>>;
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn create_rating(&self, id: &str, rating: &Rating) -> Result<bool>;
    async fn ratings(&self) -> Result<Vec<(String, Rating)>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn push_notification(&self, uid: &str, id: &str, notification: &Notification)
        -> Result<bool>;
    async fn notification(&self, uid: &str, id: &str) -> Result<Option<Notification>>;
    async fn put_notification(&self, uid: &str, id: &str, notification: &Notification)
        -> Result<()>;
    async fn delete_notification(&self, uid: &str, id: &str) -> Result<()>;
    async fn notifications(&self, uid: &str) -> Result<Vec<(String, Notification)>>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, id: &str, chat: &JobChat) -> Result<bool>;
    async fn chat(&self, id: &str) -> Result<Option<JobChat>>;
    async fn delete_chat(&self, id: &str) -> Result<()>;
    async fn chats(&self) -> Result<Vec<(String, JobChat)>>;

    async fn create_message(&self, chat_id: &str, id: &str, message: &ChatMessage)
        -> Result<bool>;
    async fn put_message(&self, chat_id: &str, id: &str, message: &ChatMessage) -> Result<()>;
    async fn messages(&self, chat_id: &str) -> Result<Vec<(String, ChatMessage)>>;
    async fn delete_messages(&self, chat_id: &str) -> Result<()>;
}

#[async_trait]
pub trait MiscStore: Send + Sync {
    async fn create_broadcast(&self, id: &str, broadcast: &Broadcast) -> Result<bool>;
    async fn create_feedback(&self, id: &str, feedback: &Feedback) -> Result<bool>;
}

/// Everything the workflows need, in one bound.
pub trait Store:
    JobStore + UserStore + RatingStore + NotificationStore + ChatStore + MiscStore
{
}

impl<T> Store for T where
    T: JobStore + UserStore + RatingStore + NotificationStore + ChatStore + MiscStore
{
}
