use std::sync::Arc;

use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{DraftRequest, GeneratedDraft},
    jobs::JOB_GENERATE_DRAFT,
    meetings::{
        find_meeting, find_transcript, mark_meeting_completed, mark_meeting_failed,
        participant_names, update_progress, STATUS_COMPLETED, STATUS_PROCESSING,
        STEP_GENERATING_DRAFT,
    },
    models::{Job, NewDraft},
    schema::drafts,
    state::AppState,
    transcript::plain_text,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct DraftPayload {
    meeting_id: Uuid,
}

/// What the blocking preparation step found.
enum Prepared {
    Ready(DraftRequest),
    AlreadyDone,
}

pub struct GenerateDraftJob;

impl GenerateDraftJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for GenerateDraftJob {
    fn job_type(&self) -> &'static str {
        JOB_GENERATE_DRAFT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: DraftPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid draft payload: {err}"),
                }
            }
        };
        let meeting_id = payload.meeting_id;

        let state_clone = state.clone();
        let request = match task::spawn_blocking(move || prepare(&state_clone, meeting_id)).await {
            Ok(Ok(Prepared::Ready(request))) => request,
            Ok(Ok(Prepared::AlreadyDone)) => {
                info!(job_id = %job.id, %meeting_id, "meeting already has a draft");
                return JobExecution::Success;
            }
            Ok(Err(execution)) => return execution,
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "draft preparation panicked");
                return JobExecution::Retry {
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        let draft = match state.clients.drafts.generate(&request).await {
            Ok(draft) => draft,
            Err(err) => {
                warn!(job_id = %job.id, %meeting_id, error = %err, "draft generation failed");
                return JobExecution::Retry {
                    error: format!("{err:#}"),
                };
            }
        };

        let state_clone = state.clone();
        match task::spawn_blocking(move || store_draft(&state_clone, meeting_id, draft)).await {
            Ok(Ok(())) => {
                info!(job_id = %job.id, %meeting_id, "draft stored");
                JobExecution::Success
            }
            Ok(Err(err)) => JobExecution::Retry { error: err },
            Err(join_err) => JobExecution::Retry {
                error: format!("worker panicked: {join_err}"),
            },
        }
    }

    async fn on_failed(&self, state: Arc<AppState>, job: &Job, error: &str) {
        let Ok(payload) = serde_json::from_value::<DraftPayload>(job.payload.clone()) else {
            return;
        };
        let message = format!("We couldn't generate a follow-up email for this meeting: {error}");
        let result = task::spawn_blocking(move || -> Result<(), String> {
            let mut conn = state.db().map_err(|err| format!("{err:?}"))?;
            mark_meeting_failed(&mut conn, payload.meeting_id, &message)
                .map_err(|err| err.to_string())
        })
        .await;

        if !matches!(result, Ok(Ok(()))) {
            error!(job_id = %job.id, "failed to mark meeting as failed");
        }
    }
}

fn prepare(state: &AppState, meeting_id: Uuid) -> Result<Prepared, JobExecution> {
    let retry = |err: String| JobExecution::Retry { error: err };
    let mut conn = state.db().map_err(|err| retry(format!("{err:?}")))?;

    let meeting = match find_meeting(&mut conn, meeting_id) {
        Ok(meeting) => meeting,
        Err(diesel::result::Error::NotFound) => {
            return Err(JobExecution::Failed {
                error: format!("meeting {meeting_id} not found"),
            })
        }
        Err(err) => return Err(retry(err.to_string())),
    };
    if meeting.status == STATUS_COMPLETED {
        return Ok(Prepared::AlreadyDone);
    }

    let transcript = find_transcript(&mut conn, meeting_id)
        .map_err(|err| retry(err.to_string()))?
        .ok_or_else(|| JobExecution::Failed {
            error: format!("meeting {meeting_id} has no transcript"),
        })?;

    update_progress(
        &mut conn,
        meeting_id,
        STATUS_PROCESSING,
        STEP_GENERATING_DRAFT,
        50,
    )
    .map_err(|err| retry(err.to_string()))?;

    Ok(Prepared::Ready(DraftRequest {
        platform: meeting.platform.clone(),
        topic: Some(meeting.topic.clone()),
        host_email: meeting.host_email.clone(),
        participants: participant_names(&meeting),
        transcript: plain_text(&transcript.content, &transcript.format),
    }))
}

fn store_draft(state: &AppState, meeting_id: Uuid, draft: GeneratedDraft) -> Result<(), String> {
    let mut pooled = state.db().map_err(|err| format!("{err:?}"))?;
    let conn: &mut PgConnection = &mut pooled;
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(drafts::table)
            .values(&NewDraft {
                id: Uuid::new_v4(),
                meeting_id,
                subject: draft.subject,
                body: draft.body,
                model: draft.model,
            })
            .execute(conn)?;
        mark_meeting_completed(conn, meeting_id)
    })
    .map_err(|err| err.to_string())
}
