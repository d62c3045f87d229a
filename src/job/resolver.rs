//! Job lookup from the jobs directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use super::{JobKind, JobRecord, is_valid_env_name, is_valid_hostname, is_valid_job_id};

const WAITING: &str = "waiting";

/// A job ready to run.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct WaitingJob {
    /// Build or push.
    pub kind: JobKind,
    /// Job identifier.
    pub id: String,
}

/// Looks up jobs by ID.
pub trait JobResolver {
    /// Loads the job `id`, which must be a waiting job of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] for unknown jobs and
    /// [`ResolveError::InvalidState`] for jobs that may not run.
    fn resolve(&self, id: &str, kind: JobKind) -> Result<JobRecord, ResolveError>;

    /// Lists waiting jobs ordered by kind, then ID.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the job store cannot be read.
    fn waiting(&self) -> Result<Vec<WaitingJob>, ResolveError>;
}

/// Reads `<jobs_dir>/<id>.json` records.
#[derive(Clone, Debug)]
pub struct FileJobResolver {
    jobs_dir: Utf8PathBuf,
}

impl FileJobResolver {
    /// Creates a resolver over `jobs_dir`.
    #[must_use]
    pub fn new(jobs_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
        }
    }

    fn open_dir(&self) -> Result<Dir, ResolveError> {
        Dir::open_ambient_dir(&self.jobs_dir, ambient_authority()).map_err(|err| {
            ResolveError::Io {
                path: self.jobs_dir.clone(),
                message: err.to_string(),
            }
        })
    }

    fn read_record(&self, dir: &Dir, file_name: &str) -> Result<Option<JobRecord>, ResolveError> {
        let path = self.jobs_dir.join(file_name);
        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ResolveError::Io {
                    path,
                    message: err.to_string(),
                });
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| ResolveError::Parse {
                path,
                message: err.to_string(),
            })
    }
}

impl JobResolver for FileJobResolver {
    fn resolve(&self, id: &str, kind: JobKind) -> Result<JobRecord, ResolveError> {
        if !is_valid_job_id(id) {
            return Err(ResolveError::InvalidId { id: id.to_owned() });
        }
        let dir = self.open_dir()?;
        let record = self
            .read_record(&dir, &format!("{id}.json"))?
            .ok_or_else(|| ResolveError::NotFound { id: id.to_owned() })?;
        validate(&record, id, kind)?;
        Ok(record)
    }

    fn waiting(&self) -> Result<Vec<WaitingJob>, ResolveError> {
        let dir = self.open_dir()?;
        let entries = dir.entries().map_err(|err| ResolveError::Io {
            path: self.jobs_dir.clone(),
            message: err.to_string(),
        })?;

        let mut jobs = Vec::new();
        for entry in entries {
            let file_name = entry
                .and_then(|found| found.file_name())
                .map_err(|err| ResolveError::Io {
                    path: self.jobs_dir.clone(),
                    message: err.to_string(),
                })?;
            if Utf8Path::new(&file_name).extension() != Some("json") {
                continue;
            }
            match self.read_record(&dir, &file_name) {
                Ok(Some(record)) if record.status == WAITING => jobs.push(WaitingJob {
                    kind: record.kind,
                    id: record.id,
                }),
                Ok(_) => {}
                Err(err) => tracing::warn!("skipping unreadable job record: {err}"),
            }
        }
        jobs.sort();
        Ok(jobs)
    }
}

fn validate(record: &JobRecord, id: &str, kind: JobKind) -> Result<(), ResolveError> {
    let invalid = |reason: String| ResolveError::InvalidState {
        id: id.to_owned(),
        reason,
    };

    if record.id != id {
        return Err(invalid(format!("record is for job {}", record.id)));
    }
    if record.status != WAITING {
        return Err(invalid(format!("status is {}, expected {WAITING}", record.status)));
    }
    if record.kind != kind {
        return Err(invalid(format!("job is a {}, not a {kind}", record.kind)));
    }
    if let Some(name) = record
        .env
        .keys()
        .chain(record.encrypted.keys())
        .find(|name| !is_valid_env_name(name))
    {
        return Err(invalid(format!("invalid environment variable name {name:?}")));
    }

    if kind == JobKind::Push {
        let Some(deployment) = &record.deployment else {
            return Err(invalid(String::from("push has no deployment target")));
        };
        if !is_valid_hostname(&deployment.server) {
            return Err(invalid(format!(
                "deployment server {:?} is not a valid hostname",
                deployment.server
            )));
        }
        if !record.build_id.as_deref().is_some_and(is_valid_job_id) {
            return Err(invalid(String::from("push does not reference a build")));
        }
    }
    Ok(())
}

/// Errors raised while resolving a job.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// The ID contains characters that cannot name a job.
    #[error("invalid job id {id:?}")]
    InvalidId {
        /// Offending ID.
        id: String,
    },
    /// No record exists for the job.
    #[error("job {id} not found")]
    NotFound {
        /// Requested ID.
        id: String,
    },
    /// The record exists but may not run.
    #[error("job {id} cannot run: {reason}")]
    InvalidState {
        /// Requested ID.
        id: String,
        /// Why the job cannot run.
        reason: String,
    },
    /// The job store could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path being read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// A record is not valid JSON.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Record path.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
}
