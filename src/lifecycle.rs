//! Job lifecycle rules.
//!
//! A job moves `Active -> Completed -> Rated`, with an orthogonal
//! fully-staffed flag on active jobs. Every transition is guarded here, as
//! pure functions over the job document and its applicant list, so the rules
//! can be tested without any store behind them.

use thiserror::Error;

use crate::model::{Applicant, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Active,
    Completed,
    Rated,
}

impl Job {
    pub fn stage(&self) -> JobStage {
        if self.is_rated {
            JobStage::Rated
        } else if self.is_completed {
            JobStage::Completed
        } else {
            JobStage::Active
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("job is completed and no longer accepts this operation")]
    JobCompleted,

    #[error("job is fully staffed")]
    FullyStaffed,

    #[error("job is not publicly listed")]
    NotPublic,

    #[error("user has already applied to this job")]
    AlreadyApplied,

    #[error("all {0} positions are already filled")]
    PositionsFilled(u32),

    #[error("applicant is not hired")]
    NotHired,

    #[error("applicant is already hired")]
    AlreadyHired,

    #[error("job is already completed")]
    AlreadyCompleted,

    #[error("job has no hired workers")]
    NoHiredWorkers,

    #[error("job is not completed yet")]
    NotCompleted,

    #[error("rating must be between 1 and 5")]
    RatingOutOfRange,

    #[error("rater is not a party to this job")]
    NotAParty,

    #[error("workers needed cannot drop below the {0} already hired")]
    WorkersNeededBelowHired(u32),

    #[error("applicant is already marked as a no-show")]
    AlreadyNoShow,
}

pub fn hired_count(applicants: &[(String, Applicant)]) -> u32 {
    applicants.iter().filter(|(_, a)| a.hired).count() as u32
}

/// Applications are only taken on active, public, not-fully-staffed jobs.
pub fn ensure_can_apply(job: &Job) -> Result<(), LifecycleError> {
    if job.stage() != JobStage::Active {
        return Err(LifecycleError::JobCompleted);
    }
    if job.is_fully_staffed {
        return Err(LifecycleError::FullyStaffed);
    }
    if !job.is_public {
        return Err(LifecycleError::NotPublic);
    }
    Ok(())
}

/// `workers_needed` bounds the hired count; the first hire past the bound is
/// rejected instead of silently accepted.
pub fn ensure_can_hire(job: &Job, applicant: &Applicant, hired: u32) -> Result<(), LifecycleError> {
    if job.stage() != JobStage::Active {
        return Err(LifecycleError::JobCompleted);
    }
    if applicant.hired {
        return Err(LifecycleError::AlreadyHired);
    }
    if hired >= job.workers_needed {
        return Err(LifecycleError::PositionsFilled(job.workers_needed));
    }
    Ok(())
}

pub fn ensure_can_unhire(job: &Job, applicant: &Applicant) -> Result<(), LifecycleError> {
    if job.stage() != JobStage::Active {
        return Err(LifecycleError::JobCompleted);
    }
    if !applicant.hired {
        return Err(LifecycleError::NotHired);
    }
    Ok(())
}

/// Set or clear the fully-staffed flag. Setting it hides the job and records
/// the prior visibility; clearing it restores that value whether or not the
/// document carried one at set time.
pub fn set_staffing(job: &mut Job, fully_staffed: bool) -> Result<(), LifecycleError> {
    if job.stage() != JobStage::Active {
        return Err(LifecycleError::JobCompleted);
    }
    if fully_staffed == job.is_fully_staffed {
        return Ok(());
    }
    if fully_staffed {
        job.was_public = Some(job.is_public);
        job.is_public = false;
        job.is_fully_staffed = true;
    } else {
        job.is_public = job.was_public.take().unwrap_or(true);
        job.is_fully_staffed = false;
    }
    Ok(())
}

/// `Active -> Completed`. Double completion and completing a job nobody was
/// hired for are both rejected.
pub fn complete(job: &mut Job, hired: u32) -> Result<(), LifecycleError> {
    if job.stage() != JobStage::Active {
        return Err(LifecycleError::AlreadyCompleted);
    }
    if hired == 0 {
        return Err(LifecycleError::NoHiredWorkers);
    }
    job.is_completed = true;
    job.is_public = false;
    job.was_public = None;
    Ok(())
}

/// Who a completed job's rating may flow between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingDirection {
    EmployerRatesWorker,
    WorkerRatesEmployer,
}

/// Validates one rating submission against a completed job. `rater` and
/// `rated` are uids; `hired` is the set of hired applicant uids.
pub fn rating_direction(
    job: &Job,
    rater: &str,
    rated: &str,
    rating: u8,
    hired: &[String],
) -> Result<RatingDirection, LifecycleError> {
    if job.stage() == JobStage::Active {
        return Err(LifecycleError::NotCompleted);
    }
    if !(1..=5).contains(&rating) {
        return Err(LifecycleError::RatingOutOfRange);
    }
    let rater_is_employer = rater == job.employer_id;
    let rated_is_hired = hired.iter().any(|uid| uid == rated);
    if rater_is_employer && rated_is_hired {
        return Ok(RatingDirection::EmployerRatesWorker);
    }
    let rater_is_hired = hired.iter().any(|uid| uid == rater);
    if rater_is_hired && rated == job.employer_id {
        return Ok(RatingDirection::WorkerRatesEmployer);
    }
    Err(LifecycleError::NotAParty)
}

/// `Completed -> Rated` once the employer has rated every hired worker.
pub fn mark_rated(job: &mut Job) {
    if job.stage() == JobStage::Completed {
        job.is_rated = true;
    }
}

pub fn ensure_can_mark_no_show(job: &Job, applicant: &Applicant) -> Result<(), LifecycleError> {
    if job.stage() == JobStage::Active {
        return Err(LifecycleError::NotCompleted);
    }
    if !applicant.hired {
        return Err(LifecycleError::NotHired);
    }
    if applicant.no_show {
        return Err(LifecycleError::AlreadyNoShow);
    }
    Ok(())
}

pub fn ensure_can_edit(job: &Job, new_workers_needed: u32, hired: u32) -> Result<(), LifecycleError> {
    if job.stage() != JobStage::Active {
        return Err(LifecycleError::JobCompleted);
    }
    if new_workers_needed < hired {
        return Err(LifecycleError::WorkersNeededBelowHired(hired));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job() -> Job {
        Job {
            title: "Warehouse shift".to_string(),
            description: "Night shift".to_string(),
            location: "Helsinki".to_string(),
            salary: "15e/h".to_string(),
            job_type: "shift".to_string(),
            employer_id: "emp-1".to_string(),
            company_name: "Acme".to_string(),
            workers_needed: 1,
            work_dates: vec!["2021-11-02".to_string()],
            is_fully_staffed: false,
            is_completed: false,
            is_public: true,
            is_rated: false,
            was_public: None,
            created_at: Utc::now(),
        }
    }

    fn applicant(hired: bool) -> Applicant {
        Applicant {
            hired,
            no_show: false,
            message: "hi".to_string(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn fully_staffed_job_rejects_applications() {
        let mut j = job();
        set_staffing(&mut j, true).unwrap();
        assert_eq!(ensure_can_apply(&j), Err(LifecycleError::FullyStaffed));
    }

    #[test]
    fn completed_job_rejects_applications() {
        let mut j = job();
        complete(&mut j, 1).unwrap();
        assert_eq!(ensure_can_apply(&j), Err(LifecycleError::JobCompleted));
    }

    #[test]
    fn hire_is_bounded_by_workers_needed() {
        let j = job();
        assert!(ensure_can_hire(&j, &applicant(false), 0).is_ok());
        assert_eq!(
            ensure_can_hire(&j, &applicant(false), 1),
            Err(LifecycleError::PositionsFilled(1))
        );
    }

    #[test]
    fn unhire_requires_hired() {
        let j = job();
        assert_eq!(
            ensure_can_unhire(&j, &applicant(false)),
            Err(LifecycleError::NotHired)
        );
        assert!(ensure_can_unhire(&j, &applicant(true)).is_ok());
    }

    #[test]
    fn staffing_toggle_restores_prior_visibility() {
        let mut j = job();
        j.is_public = false;
        set_staffing(&mut j, true).unwrap();
        assert!(!j.is_public);
        set_staffing(&mut j, false).unwrap();
        assert!(!j.is_public);

        let mut j = job();
        set_staffing(&mut j, true).unwrap();
        assert!(!j.is_public && j.is_fully_staffed);
        set_staffing(&mut j, false).unwrap();
        assert!(j.is_public && !j.is_fully_staffed);
    }

    #[test]
    fn staffing_toggle_is_idempotent() {
        let mut j = job();
        set_staffing(&mut j, true).unwrap();
        set_staffing(&mut j, true).unwrap();
        set_staffing(&mut j, false).unwrap();
        assert!(j.is_public);
    }

    #[test]
    fn completion_is_guarded() {
        let mut j = job();
        assert_eq!(complete(&mut j, 0), Err(LifecycleError::NoHiredWorkers));
        complete(&mut j, 1).unwrap();
        assert!(j.is_completed && !j.is_public);
        assert_eq!(complete(&mut j, 1), Err(LifecycleError::AlreadyCompleted));
    }

    #[test]
    fn rating_requires_completion_and_range() {
        let mut j = job();
        let hired = vec!["worker-1".to_string()];
        assert_eq!(
            rating_direction(&j, "emp-1", "worker-1", 5, &hired),
            Err(LifecycleError::NotCompleted)
        );
        complete(&mut j, 1).unwrap();
        assert_eq!(
            rating_direction(&j, "emp-1", "worker-1", 0, &hired),
            Err(LifecycleError::RatingOutOfRange)
        );
        assert_eq!(
            rating_direction(&j, "emp-1", "worker-1", 5, &hired),
            Ok(RatingDirection::EmployerRatesWorker)
        );
        assert_eq!(
            rating_direction(&j, "worker-1", "emp-1", 4, &hired),
            Ok(RatingDirection::WorkerRatesEmployer)
        );
        assert_eq!(
            rating_direction(&j, "stranger", "worker-1", 4, &hired),
            Err(LifecycleError::NotAParty)
        );
    }

    #[test]
    fn no_show_only_once_per_worker() {
        let mut j = job();
        complete(&mut j, 1).unwrap();
        let mut a = applicant(true);
        assert!(ensure_can_mark_no_show(&j, &a).is_ok());
        a.no_show = true;
        assert_eq!(
            ensure_can_mark_no_show(&j, &a),
            Err(LifecycleError::AlreadyNoShow)
        );
    }

    #[test]
    fn no_show_requires_a_completed_job() {
        let j = job();
        assert_eq!(
            ensure_can_mark_no_show(&j, &applicant(true)),
            Err(LifecycleError::NotCompleted)
        );
    }

    #[test]
    fn edit_cannot_shrink_below_hired() {
        let j = job();
        assert_eq!(
            ensure_can_edit(&j, 0, 1),
            Err(LifecycleError::WorkersNeededBelowHired(1))
        );
        assert!(ensure_can_edit(&j, 2, 1).is_ok());
    }

    #[test]
    fn edit_is_closed_once_completed() {
        let mut j = job();
        complete(&mut j, 1).unwrap();
        assert_eq!(
            ensure_can_edit(&j, 3, 1),
            Err(LifecycleError::JobCompleted)
        );
    }
}
