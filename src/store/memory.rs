//! In-memory store used by the tests (and handy for local hacking). One
//! mutex over all maps, so every trait call is atomic with respect to the
//! others.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::model::{
    AcceptedJob, Applicant, Broadcast, ChatMessage, Feedback, Job, JobChat, Notification, Rating,
    User,
};
use crate::store::{
    ChatStore, JobLocks, JobStore, MiscStore, NotificationStore, RatingStore, UserStore,
};

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<String, Job>,
    applicants: BTreeMap<String, BTreeMap<String, Applicant>>,
    users: BTreeMap<String, User>,
    accepted_jobs: BTreeMap<String, BTreeMap<String, AcceptedJob>>,
    ratings: BTreeMap<String, Rating>,
    notifications: BTreeMap<String, BTreeMap<String, Notification>>,
    chats: BTreeMap<String, JobChat>,
    messages: BTreeMap<String, BTreeMap<String, ChatMessage>>,
    broadcasts: BTreeMap<String, Broadcast>,
    feedback: BTreeMap<String, Feedback>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    locks: JobLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn try_insert<T: Clone>(map: &mut BTreeMap<String, T>, id: &str, value: &T) -> bool {
    if map.contains_key(id) {
        false
    } else {
        map.insert(id.to_string(), value.clone());
        true
    }
}

fn to_vec<T: Clone>(map: &BTreeMap<String, T>) -> Vec<(String, T)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn lock_job(&self, job_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.locks.acquire(job_id).await
    }

    async fn create_job(&self, id: &str, job: &Job) -> Result<bool> {
        Ok(try_insert(&mut self.inner.lock().await.jobs, id, job))
    }

    async fn job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(id).cloned())
    }

    async fn put_job(&self, id: &str, job: &Job) -> Result<()> {
        self.inner
            .lock()
            .await
            .jobs
            .insert(id.to_string(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        self.inner.lock().await.jobs.remove(id);
        Ok(())
    }

    async fn jobs(&self) -> Result<Vec<(String, Job)>> {
        Ok(to_vec(&self.inner.lock().await.jobs))
    }

    async fn create_applicant(
        &self,
        job_id: &str,
        uid: &str,
        applicant: &Applicant,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let map = inner.applicants.entry(job_id.to_string()).or_default();
        Ok(try_insert(map, uid, applicant))
    }

    async fn applicant(&self, job_id: &str, uid: &str) -> Result<Option<Applicant>> {
        Ok(self
            .inner
            .lock()
            .await
            .applicants
            .get(job_id)
            .and_then(|m| m.get(uid))
            .cloned())
    }

    async fn put_applicant(&self, job_id: &str, uid: &str, applicant: &Applicant) -> Result<()> {
        self.inner
            .lock()
            .await
            .applicants
            .entry(job_id.to_string())
            .or_default()
            .insert(uid.to_string(), applicant.clone());
        Ok(())
    }

    async fn applicants(&self, job_id: &str) -> Result<Vec<(String, Applicant)>> {
        Ok(self
            .inner
            .lock()
            .await
            .applicants
            .get(job_id)
            .map(to_vec)
            .unwrap_or_default())
    }

    async fn delete_applicants(&self, job_id: &str) -> Result<()> {
        self.inner.lock().await.applicants.remove(job_id);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(uid).cloned())
    }

    async fn put_user(&self, uid: &str, user: &User) -> Result<()> {
        self.inner
            .lock()
            .await
            .users
            .insert(uid.to_string(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        self.inner.lock().await.users.remove(uid);
        Ok(())
    }

    async fn users(&self) -> Result<Vec<(String, User)>> {
        Ok(to_vec(&self.inner.lock().await.users))
    }

    async fn create_accepted_job(
        &self,
        uid: &str,
        job_id: &str,
        record: &AcceptedJob,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let map = inner.accepted_jobs.entry(uid.to_string()).or_default();
        Ok(try_insert(map, job_id, record))
    }

    async fn delete_accepted_job(&self, uid: &str, job_id: &str) -> Result<()> {
        if let Some(map) = self.inner.lock().await.accepted_jobs.get_mut(uid) {
            map.remove(job_id);
        }
        Ok(())
    }

    async fn accepted_jobs(&self, uid: &str) -> Result<Vec<(String, AcceptedJob)>> {
        Ok(self
            .inner
            .lock()
            .await
            .accepted_jobs
            .get(uid)
            .map(to_vec)
            .unwrap_or_default())
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn create_rating(&self, id: &str, rating: &Rating) -> Result<bool> {
        Ok(try_insert(&mut self.inner.lock().await.ratings, id, rating))
    }

    async fn ratings(&self) -> Result<Vec<(String, Rating)>> {
        Ok(to_vec(&self.inner.lock().await.ratings))
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn push_notification(
        &self,
        uid: &str,
        id: &str,
        notification: &Notification,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let map = inner.notifications.entry(uid.to_string()).or_default();
        Ok(try_insert(map, id, notification))
    }

    async fn notification(&self, uid: &str, id: &str) -> Result<Option<Notification>> {
        Ok(self
            .inner
            .lock()
            .await
            .notifications
            .get(uid)
            .and_then(|m| m.get(id))
            .cloned())
    }

    async fn put_notification(
        &self,
        uid: &str,
        id: &str,
        notification: &Notification,
    ) -> Result<()> {
        self.inner
            .lock()
            .await
            .notifications
            .entry(uid.to_string())
            .or_default()
            .insert(id.to_string(), notification.clone());
        Ok(())
    }

    async fn delete_notification(&self, uid: &str, id: &str) -> Result<()> {
        if let Some(map) = self.inner.lock().await.notifications.get_mut(uid) {
            map.remove(id);
        }
        Ok(())
    }

    async fn notifications(&self, uid: &str) -> Result<Vec<(String, Notification)>> {
        Ok(self
            .inner
            .lock()
            .await
            .notifications
            .get(uid)
            .map(to_vec)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_chat(&self, id: &str, chat: &JobChat) -> Result<bool> {
        Ok(try_insert(&mut self.inner.lock().await.chats, id, chat))
    }

    async fn chat(&self, id: &str) -> Result<Option<JobChat>> {
        Ok(self.inner.lock().await.chats.get(id).cloned())
    }

    async fn delete_chat(&self, id: &str) -> Result<()> {
        self.inner.lock().await.chats.remove(id);
        Ok(())
    }

    async fn chats(&self) -> Result<Vec<(String, JobChat)>> {
        Ok(to_vec(&self.inner.lock().await.chats))
    }

    async fn create_message(
        &self,
        chat_id: &str,
        id: &str,
        message: &ChatMessage,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let map = inner.messages.entry(chat_id.to_string()).or_default();
        Ok(try_insert(map, id, message))
    }

    async fn put_message(&self, chat_id: &str, id: &str, message: &ChatMessage) -> Result<()> {
        self.inner
            .lock()
            .await
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .insert(id.to_string(), message.clone());
        Ok(())
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<(String, ChatMessage)>> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .get(chat_id)
            .map(to_vec)
            .unwrap_or_default())
    }

    async fn delete_messages(&self, chat_id: &str) -> Result<()> {
        self.inner.lock().await.messages.remove(chat_id);
        Ok(())
    }
}

#[async_trait]
impl MiscStore for MemoryStore {
    async fn create_broadcast(&self, id: &str, broadcast: &Broadcast) -> Result<bool> {
        Ok(try_insert(
            &mut self.inner.lock().await.broadcasts,
            id,
            broadcast,
        ))
    }

    async fn create_feedback(&self, id: &str, feedback: &Feedback) -> Result<bool> {
        Ok(try_insert(
            &mut self.inner.lock().await.feedback,
            id,
            feedback,
        ))
    }
}
