use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use draw_core::{ExclusionError, ExclusionSet, ParticipantId, SolveError, Solver};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::{now_millis, AppState};

#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("group not found")]
    GroupNotFound,
    #[error("group has already been drawn")]
    AlreadyDrawn,
    #[error("not enough participants: need at least {required}, have {found}")]
    InsufficientParticipants { required: usize, found: usize },
    #[error("stored exclusions are unreadable: {0}")]
    MalformedExclusion(#[from] ExclusionError),
    #[error("drawing failed, adjust exclusions and retry: {0}")]
    Solve(#[from] SolveError<ParticipantId>),
}

impl DrawError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::GroupNotFound => StatusCode::NOT_FOUND,
            Self::AlreadyDrawn => StatusCode::CONFLICT,
            Self::InsufficientParticipants { .. } => StatusCode::BAD_REQUEST,
            Self::Solve(SolveError::Infeasible { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MalformedExclusion(_) | Self::Solve(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DrawError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DrawOutcome {
    pub group_id: String,
    pub participants: usize,
    pub drawn_at: u64,
}

/// Draws the group once: check not drawn, solve, then store the pairing and
/// the drawn flag together.
///
/// The write lock is held from the check until the pairing is stored, so of
/// two concurrent draws for one group exactly one succeeds and the other sees
/// [`DrawError::AlreadyDrawn`]. A failed draw leaves the group untouched.
pub async fn perform_draw(
    state: &AppState,
    group_id: &str,
    seed: Option<u64>,
) -> Result<DrawOutcome, DrawError> {
    let mut groups = state.groups.write().await;
    let group = groups.get_mut(group_id).ok_or(DrawError::GroupNotFound)?;

    if group.drawn {
        return Err(DrawError::AlreadyDrawn);
    }

    let required = state.config.min_participants;
    let found = group.participants.len();
    if found < required {
        return Err(DrawError::InsufficientParticipants { required, found });
    }

    let participants = group.participant_ids();
    let exclusions = ExclusionSet::from_keys(group.active_exclusion_keys(), &participants)?;
    let mut rng = seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);

    let solver = Solver::new(state.config.solver);
    let pairing = match solver.solve(&participants, &exclusions, &mut rng) {
        Ok(pairing) => pairing,
        Err(err) => {
            warn!(
                group_id,
                participants = found,
                exclusions = exclusions.len(),
                %err,
                "draw failed"
            );
            return Err(err.into());
        }
    };

    let drawn_at = now_millis();
    group.pairing = Some(pairing);
    group.drawn = true;
    group.drawn_at = Some(drawn_at);
    info!(group_id, participants = found, "group drawn");

    drop(groups);
    state.persist().await;

    Ok(DrawOutcome {
        group_id: group_id.to_string(),
        participants: found,
        drawn_at,
    })
}
