use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const JOBS_COLLECTION: &str = "jobs";
pub const USERS_COLLECTION: &str = "users";
pub const JOB_CHATS_COLLECTION: &str = "jobChats";
pub const RATINGS_COLLECTION: &str = "ratings";
pub const BROADCASTS_COLLECTION: &str = "broadcasts";
pub const FEEDBACK_COLLECTION: &str = "feedback";

pub const APPLICANTS_SUBCOLLECTION: &str = "applicants";
pub const ACCEPTED_JOBS_SUBCOLLECTION: &str = "acceptedJobs";
pub const NOTIFICATIONS_SUBCOLLECTION: &str = "notifications";
pub const MESSAGES_SUBCOLLECTION: &str = "messages";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub title: String,
    pub description: String,
    pub location: String,
    pub salary: String,
    pub job_type: String,
    pub employer_id: String,
    pub company_name: String,
    pub workers_needed: u32,
    pub work_dates: Vec<String>,
    pub is_fully_staffed: bool,
    pub is_completed: bool,
    pub is_public: bool,
    pub is_rated: bool,

    /// Visibility the job had before it was marked fully staffed, restored
    /// when the flag is cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_public: Option<bool>,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Lives under `jobs/{jobId}/applicants/{userId}`; the document id is the
/// applicant's uid, so a second application by the same user is a create
/// collision rather than a duplicate document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Applicant {
    pub hired: bool,
    pub no_show: bool,
    pub message: String,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub applied_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub display_name: String,
    pub email: String,
    pub is_admin: bool,
    pub is_employer: bool,
    pub pending_employer: bool,
    pub pending_deletion: bool,
    pub skills: Vec<String>,
    pub languages: Vec<String>,

    /// Running rating aggregate; the exposed average is `sum / count` so it
    /// cannot drift from the rating documents.
    pub rating_sum: u64,
    pub rating_count: u64,

    pub worked_jobs: Vec<String>,
    pub no_shows: u32,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn average_rating(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum as f64 / self.rating_count as f64)
        }
    }
}

/// Denormalized hire record under `users/{userId}/acceptedJobs/{jobId}`,
/// created on hire and deleted on unhire by the same workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedJob {
    pub job_title: String,
    pub company_name: String,
    pub employer_id: String,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub hired_at: DateTime<Utc>,
}

/// Top-level `ratings` collection. The document id is
/// `{jobId}:{ratedBy}:{ratedUser}`, which makes a retried submission a
/// create collision instead of a second document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub job_id: String,
    pub rated_by: String,
    pub rated_user: String,
    pub rating: u8,
    pub review: String,
    pub is_employer_rating: bool,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}

pub fn rating_key(job_id: &str, rated_by: &str, rated_user: &str) -> String {
    format!("{}:{}:{}", job_id, rated_by, rated_user)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Applied,
    Hired,
    Unhired,
    JobCompleted,
    NoShow,
    ChatMessage,
    EmployerApproved,
    Broadcast,
}

/// Lives under `users/{userId}/notifications`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<String>,

    pub is_history: bool,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// A chat between one employer and one applicant about one job, keyed
/// `{jobId}:{applicantId}`; messages live in a subcollection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobChat {
    pub job_id: String,
    pub applicant_id: String,
    pub employer_id: String,
    pub applicant_name: String,
    pub company_name: String,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}

pub fn chat_key(job_id: &str, applicant_id: &str) -> String {
    format!("{}:{}", job_id, applicant_id)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub read: bool,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub sent_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub sent_by: String,
    pub body: String,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub from_user: String,
    pub body: String,

    #[serde(with = "firestore_serde_timestamp::timestamp")]
    pub created_at: DateTime<Utc>,
}
