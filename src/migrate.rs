//! One-shot consolidation of the legacy data layout, where applicants were
//! stored under `jobChats/{id}/applicants`, into the authoritative
//! `jobs/{id}/applicants` subcollection. Takes a JSON export of the legacy
//! chats as input; existing applicant documents are left untouched
//! (create-if-absent), so the migration can be re-run safely.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::{collections::HashMap, fs::read_to_string, path::PathBuf};

use crate::model::Applicant;
use crate::store::firestore::MarketDatabase;
use crate::store::JobStore;

#[derive(Deserialize)]
struct LegacyExport {
    #[serde(rename = "jobChats")]
    job_chats: Vec<LegacyChat>,
}

#[derive(Deserialize)]
struct LegacyChat {
    #[serde(rename = "jobId")]
    job_id: String,

    #[serde(default)]
    applicants: HashMap<String, LegacyApplicant>,
}

#[derive(Deserialize)]
struct LegacyApplicant {
    #[serde(default)]
    hired: bool,

    #[serde(default)]
    message: String,

    timestamp: String,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub async fn migrate(path: PathBuf, db: MarketDatabase) -> Result<()> {
    let export_json = read_to_string(path)?;
    let export: LegacyExport = serde_json::from_str(&export_json)?;

    for chat in export.job_chats {
        let job_id = chat.job_id;
        let _span = tracing::info_span!("Job", %job_id).entered();

        for (applicant_id, legacy) in chat.applicants {
            let _span = tracing::info_span!("Applicant", %applicant_id).entered();

            let applicant = Applicant {
                hired: legacy.hired,
                no_show: false,
                message: legacy.message,
                applied_at: parse_timestamp(&legacy.timestamp)?,
            };

            tracing::info!("Moving applicant.");
            let created = db.create_applicant(&job_id, &applicant_id, &applicant).await?;
            tracing::info!(%created, "Success (applicant).");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_timestamp_formats() {
        assert!(parse_timestamp("2021-11-02T10:30:00+00:00").is_ok());
        assert!(parse_timestamp("2021-11-02 10:30:00.123").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
