//! Firestore-backed store.
//!
//! One `MarketDatabase` wraps a `tiny_firestore_odm::Database` and exposes
//! the typed collections; a deadpool manager hands out handles to request
//! handlers. Collection layout:
//!
//! ```text
//! jobs/{jobId}                 + applicants/{userId}
//! users/{userId}               + acceptedJobs/{jobId}, notifications/{id}
//! jobChats/{jobId}:{userId}    + messages/{id}
//! ratings/{jobId}:{by}:{user}
//! broadcasts/{id}, feedback/{id}
//! ```

use anyhow::Result;
use async_trait::async_trait;
use deadpool::managed;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use tiny_firestore_odm::{Collection, Database};

use crate::get_creds_and_project;
use crate::model::{
    AcceptedJob, Applicant, Broadcast, ChatMessage, Feedback, Job, JobChat, Notification, Rating,
    User, ACCEPTED_JOBS_SUBCOLLECTION, APPLICANTS_SUBCOLLECTION, BROADCASTS_COLLECTION,
    FEEDBACK_COLLECTION, JOBS_COLLECTION, JOB_CHATS_COLLECTION, MESSAGES_SUBCOLLECTION,
    NOTIFICATIONS_SUBCOLLECTION, RATINGS_COLLECTION, USERS_COLLECTION,
};
use crate::store::{
    ChatStore, JobLocks, JobStore, MiscStore, NotificationStore, RatingStore, UserStore,
};

pub struct MarketDatabase {
    db: Database,
    locks: JobLocks,
}

impl MarketDatabase {
    pub fn new(db: Database, locks: JobLocks) -> Self {
        MarketDatabase { db, locks }
    }

    fn jobs_col(&self) -> Collection<Job> {
        self.db.collection(JOBS_COLLECTION)
    }

    fn users_col(&self) -> Collection<User> {
        self.db.collection(USERS_COLLECTION)
    }

    fn ratings_col(&self) -> Collection<Rating> {
        self.db.collection(RATINGS_COLLECTION)
    }

    fn chats_col(&self) -> Collection<JobChat> {
        self.db.collection(JOB_CHATS_COLLECTION)
    }

    fn applicants_col(&self, job_id: &str) -> Collection<Applicant> {
        self.jobs_col().subcollection(job_id, APPLICANTS_SUBCOLLECTION)
    }

    fn accepted_jobs_of(&self, uid: &str) -> Collection<AcceptedJob> {
        self.users_col().subcollection(uid, ACCEPTED_JOBS_SUBCOLLECTION)
    }

    fn notifications_of(&self, uid: &str) -> Collection<Notification> {
        self.users_col().subcollection(uid, NOTIFICATIONS_SUBCOLLECTION)
    }

    fn messages_of(&self, chat_id: &str) -> Collection<ChatMessage> {
        self.chats_col().subcollection(chat_id, MESSAGES_SUBCOLLECTION)
    }
}

async fn get_doc<T>(collection: &Collection<T>, id: &str) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned + Unpin + 'static,
{
    Ok(collection.get(id).await.ok())
}

async fn put_doc<T>(collection: &Collection<T>, id: &str, value: &T) -> Result<()>
where
    T: Serialize + DeserializeOwned + Unpin + 'static,
{
    collection.upsert(value, id).await?;
    Ok(())
}

async fn delete_doc<T>(collection: &Collection<T>, id: &str) -> Result<()>
where
    T: Serialize + DeserializeOwned + Unpin + 'static,
{
    collection.delete(id).await?;
    Ok(())
}

async fn list_docs<T>(collection: &Collection<T>) -> Result<Vec<(String, T)>>
where
    T: Serialize + DeserializeOwned + Unpin + 'static,
{
    let stream = collection.list();
    futures::pin_mut!(stream);
    let mut result = Vec::new();
    while let Some(doc) = stream.next().await {
        result.push((doc.name.leaf_name().to_string(), doc.value));
    }
    Ok(result)
}

async fn clear_collection<T>(collection: &Collection<T>) -> Result<()>
where
    T: Serialize + DeserializeOwned + Unpin + 'static,
{
    for (id, _) in list_docs(collection).await? {
        delete_doc(collection, &id).await?;
    }
    Ok(())
}

#[async_trait]
impl JobStore for MarketDatabase {
    async fn lock_job(&self, job_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.locks.acquire(job_id).await
    }

    async fn create_job(&self, id: &str, job: &Job) -> Result<bool> {
        Ok(self.jobs_col().try_create(job, id).await?)
    }

    async fn job(&self, id: &str) -> Result<Option<Job>> {
        get_doc(&self.jobs_col(), id).await
    }

    async fn put_job(&self, id: &str, job: &Job) -> Result<()> {
        put_doc(&self.jobs_col(), id, job).await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        delete_doc(&self.jobs_col(), id).await
    }

    async fn jobs(&self) -> Result<Vec<(String, Job)>> {
        list_docs(&self.jobs_col()).await
    }

    async fn create_applicant(
        &self,
        job_id: &str,
        uid: &str,
        applicant: &Applicant,
    ) -> Result<bool> {
        Ok(self.applicants_col(job_id).try_create(applicant, uid).await?)
    }

    async fn applicant(&self, job_id: &str, uid: &str) -> Result<Option<Applicant>> {
        get_doc(&self.applicants_col(job_id), uid).await
    }

    async fn put_applicant(&self, job_id: &str, uid: &str, applicant: &Applicant) -> Result<()> {
        put_doc(&self.applicants_col(job_id), uid, applicant).await
    }

    async fn applicants(&self, job_id: &str) -> Result<Vec<(String, Applicant)>> {
        list_docs(&self.applicants_col(job_id)).await
    }

    async fn delete_applicants(&self, job_id: &str) -> Result<()> {
        clear_collection(&self.applicants_col(job_id)).await
    }
}

#[async_trait]
impl UserStore for MarketDatabase {
    async fn user(&self, uid: &str) -> Result<Option<User>> {
        get_doc(&self.users_col(), uid).await
    }

    async fn put_user(&self, uid: &str, user: &User) -> Result<()> {
        put_doc(&self.users_col(), uid, user).await
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        delete_doc(&self.users_col(), uid).await
    }

    async fn users(&self) -> Result<Vec<(String, User)>> {
        list_docs(&self.users_col()).await
    }

    async fn create_accepted_job(
        &self,
        uid: &str,
        job_id: &str,
        record: &AcceptedJob,
    ) -> Result<bool> {
        Ok(self.accepted_jobs_of(uid).try_create(record, job_id).await?)
    }

    async fn delete_accepted_job(&self, uid: &str, job_id: &str) -> Result<()> {
        delete_doc(&self.accepted_jobs_of(uid), job_id).await
    }

    async fn accepted_jobs(&self, uid: &str) -> Result<Vec<(String, AcceptedJob)>> {
        list_docs(&self.accepted_jobs_of(uid)).await
    }
}

#[async_trait]
impl RatingStore for MarketDatabase {
    async fn create_rating(&self, id: &str, rating: &Rating) -> Result<bool> {
        Ok(self.ratings_col().try_create(rating, id).await?)
    }

    async fn ratings(&self) -> Result<Vec<(String, Rating)>> {
        list_docs(&self.ratings_col()).await
    }
}

#[async_trait]
impl NotificationStore for MarketDatabase {
    async fn push_notification(
        &self,
        uid: &str,
        id: &str,
        notification: &Notification,
    ) -> Result<bool> {
        Ok(self
            .notifications_of(uid)
            .try_create(notification, id)
            .await?)
    }

    async fn notification(&self, uid: &str, id: &str) -> Result<Option<Notification>> {
        get_doc(&self.notifications_of(uid), id).await
    }

    async fn put_notification(
        &self,
        uid: &str,
        id: &str,
        notification: &Notification,
    ) -> Result<()> {
        put_doc(&self.notifications_of(uid), id, notification).await
    }

    async fn delete_notification(&self, uid: &str, id: &str) -> Result<()> {
        delete_doc(&self.notifications_of(uid), id).await
    }

    async fn notifications(&self, uid: &str) -> Result<Vec<(String, Notification)>> {
        list_docs(&self.notifications_of(uid)).await
    }
}

#[async_trait]
impl ChatStore for MarketDatabase {
    async fn create_chat(&self, id: &str, chat: &JobChat) -> Result<bool> {
        Ok(self.chats_col().try_create(chat, id).await?)
    }

    async fn chat(&self, id: &str) -> Result<Option<JobChat>> {
        get_doc(&self.chats_col(), id).await
    }

    async fn delete_chat(&self, id: &str) -> Result<()> {
        delete_doc(&self.chats_col(), id).await
    }

    async fn chats(&self) -> Result<Vec<(String, JobChat)>> {
        list_docs(&self.chats_col()).await
    }

    async fn create_message(
        &self,
        chat_id: &str,
        id: &str,
        message: &ChatMessage,
    ) -> Result<bool> {
        Ok(self.messages_of(chat_id).try_create(message, id).await?)
    }

    async fn put_message(&self, chat_id: &str, id: &str, message: &ChatMessage) -> Result<()> {
        put_doc(&self.messages_of(chat_id), id, message).await
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<(String, ChatMessage)>> {
        list_docs(&self.messages_of(chat_id)).await
    }

    async fn delete_messages(&self, chat_id: &str) -> Result<()> {
        clear_collection(&self.messages_of(chat_id)).await
    }
}

#[async_trait]
impl MiscStore for MarketDatabase {
    async fn create_broadcast(&self, id: &str, broadcast: &Broadcast) -> Result<bool> {
        let broadcasts: Collection<Broadcast> = self.db.collection(BROADCASTS_COLLECTION);
        Ok(broadcasts.try_create(broadcast, id).await?)
    }

    async fn create_feedback(&self, id: &str, feedback: &Feedback) -> Result<bool> {
        let feedback_col: Collection<Feedback> = self.db.collection(FEEDBACK_COLLECTION);
        Ok(feedback_col.try_create(feedback, id).await?)
    }
}

/// Pool handles share one `JobLocks` so that per-job serialization holds
/// across every pooled connection in the process.
#[derive(Default)]
pub struct MarketDatabaseManager {
    locks: JobLocks,
}

#[async_trait]
impl managed::Manager for MarketDatabaseManager {
    type Type = MarketDatabase;
    type Error = Infallible;

    async fn create(&self) -> Result<MarketDatabase, Infallible> {
        let (token_source, project_id) = get_creds_and_project().await;
        let db = Database::new(token_source, &project_id).await;

        Ok(MarketDatabase::new(db, self.locks.clone()))
    }

    async fn recycle(&self, _: &mut MarketDatabase) -> managed::RecycleResult<Infallible> {
        Ok(())
    }
}
