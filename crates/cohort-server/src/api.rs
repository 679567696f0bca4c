use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use cohort_shared::constants::{CHAT_HISTORY_LIMIT, UPCOMING_HOURS};
use cohort_shared::models::{
    Annotation, ChatMessage, EditRecord, LeaderboardEntry, Member, NewContent, NewRoom, NewSession,
    ProgressRecord, Room, RoomAnalytics, RoomDetails, RoomSummary, Session, SessionNote,
    SessionParticipant, SessionSummary, SharedContent, SkillStats, Streak, UpcomingSession,
    UserSkillAnalytics,
};
use cohort_shared::protocol::ServerEvent;
use cohort_shared::role::Role;
use cohort_shared::types::SessionStatus;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::ServerError;
use crate::fanout::Fanout;
use crate::mastery::MasteryClient;
use crate::store::Store;
use crate::ws;

/// Largest chat history page a client may ask for.
const MAX_HISTORY_PAGE: u32 = 500;

/// Longest look-ahead accepted for upcoming sessions (one week).
const MAX_UPCOMING_HOURS: i64 = 168;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub fanout: Arc<Fanout>,
    pub mastery: MasteryClient,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        // Rooms and membership
        .route("/rooms", post(create_room))
        .route("/rooms/mine", get(my_rooms))
        .route("/rooms/code/{code}", get(room_by_code))
        .route("/rooms/code/{code}/join", post(join_by_code))
        .route("/rooms/{room_id}", get(room_details).delete(delete_room))
        .route("/rooms/{room_id}/join", post(join_room))
        .route("/rooms/{room_id}/leave", post(leave_room))
        .route("/rooms/{room_id}/invite", post(invite))
        .route("/rooms/{room_id}/members/active", get(active_members))
        .route("/rooms/{room_id}/members/{user_id}", delete(remove_member))
        .route("/rooms/{room_id}/members/{user_id}/promote", post(promote))
        .route("/rooms/{room_id}/messages", get(messages))
        // Shared content
        .route("/rooms/{room_id}/content", post(share_content).get(list_content))
        .route("/content/{content_id}", get(get_content))
        .route(
            "/content/{content_id}/annotations",
            post(annotate).get(annotations),
        )
        .route("/content/{content_id}/edits", get(edits))
        .route("/content/{content_id}/results", post(submit_quiz_result))
        .route("/content/{content_id}/leaderboard", get(leaderboard))
        // Sessions
        .route("/rooms/{room_id}/sessions", post(create_session).get(list_sessions))
        .route("/rooms/{room_id}/sessions/active", get(active_session))
        .route("/sessions/upcoming", get(upcoming_sessions))
        .route("/sessions/{session_id}/start", post(start_session))
        .route("/sessions/{session_id}/end", post(end_session))
        .route("/sessions/{session_id}/join", post(join_session))
        .route("/sessions/{session_id}/participants", get(participants))
        .route("/sessions/{session_id}/position", post(sync_position))
        .route("/sessions/{session_id}/summary", get(session_summary))
        .route(
            "/sessions/{session_id}/notes",
            get(session_notes).put(save_notes),
        )
        // Progress
        .route("/rooms/{room_id}/progress", post(record_progress))
        .route("/rooms/{room_id}/answers", post(submit_answer))
        .route("/rooms/{room_id}/stats", get(group_stats))
        .route("/rooms/{room_id}/analytics", get(room_analytics))
        .route("/rooms/{room_id}/analytics/me", get(my_analytics))
        .route("/streak", get(streak))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Rooms and membership ───

#[derive(Serialize)]
struct JoinResponse {
    #[serde(flatten)]
    room: Room,
    /// `false` when the caller was already a member.
    joined: bool,
}

#[derive(Deserialize)]
struct InviteRequest {
    email: String,
}

#[derive(Serialize)]
struct InviteResponse {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<u32>,
}

async fn create_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(draft): Json<NewRoom>,
) -> Result<(StatusCode, Json<Room>), ServerError> {
    let owner = user.id;
    let room = state
        .store
        .call(move |db| db.create_room(&draft, owner))
        .await?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn my_rooms(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<RoomSummary>>, ServerError> {
    let rooms = state
        .store
        .call(move |db| db.list_user_rooms(user.id))
        .await?;
    Ok(Json(rooms))
}

/// Lookup by invite code is open to any authenticated user so the room can
/// be previewed before joining.
async fn room_by_code(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(code): Path<String>,
) -> Result<Json<Room>, ServerError> {
    let room = state
        .store
        .call(move |db| db.get_room_by_code(&code))
        .await?;
    Ok(Json(room))
}

async fn join_by_code(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(code): Path<String>,
) -> Result<Json<JoinResponse>, ServerError> {
    let user_id = user.id;
    let (room, joined) = state
        .store
        .call(move |db| {
            let room = db.get_room_by_code(&code)?;
            let joined = db.join_room(room.id, user_id, Role::Member)?;
            Ok((room, joined))
        })
        .await?;

    announce_join(&state, room.id, user_id, joined).await;
    Ok(Json(JoinResponse { room, joined }))
}

async fn room_details(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomDetails>, ServerError> {
    let details = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.get_room_details(room_id)
        })
        .await?;
    Ok(Json(details))
}

async fn delete_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user_id = user.id;
    state
        .store
        .call(move |db| db.delete_room(room_id, user_id))
        .await?;

    state.fanout.close_room(room_id).await;
    info!(%room_id, by = %user_id, "room deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn join_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<JoinResponse>, ServerError> {
    let user_id = user.id;
    let (room, joined) = state
        .store
        .call(move |db| {
            let joined = db.join_room(room_id, user_id, Role::Member)?;
            Ok((db.get_room(room_id)?, joined))
        })
        .await?;

    announce_join(&state, room_id, user_id, joined).await;
    Ok(Json(JoinResponse { room, joined }))
}

async fn announce_join(state: &AppState, room_id: Uuid, user_id: Uuid, joined: bool) {
    if joined {
        state
            .fanout
            .publish_room(
                room_id,
                &ServerEvent::MemberAdded {
                    room_id,
                    user_id,
                    role: Role::Member,
                },
            )
            .await;
    }
    state.fanout.publish_members(room_id).await;
}

async fn leave_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user_id = user.id;
    state
        .store
        .call(move |db| db.leave_room(room_id, user_id))
        .await?;

    state
        .fanout
        .publish_room(room_id, &ServerEvent::MemberLeft { room_id, user_id })
        .await;
    state.fanout.evict(room_id, user_id).await;
    Ok(Json(serde_json::json!({ "left": true })))
}

async fn invite(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<InviteResponse>, ServerError> {
    let inviter = user.id;
    let invitee = state
        .store
        .call(move |db| db.invite(room_id, inviter, req.email.trim()))
        .await?;

    state
        .fanout
        .publish_room(
            room_id,
            &ServerEvent::MemberAdded {
                room_id,
                user_id: invitee,
                role: Role::Member,
            },
        )
        .await;
    Ok(Json(InviteResponse { user_id: invitee }))
}

async fn remove_member(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((room_id, target)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let remover = user.id;
    state
        .store
        .call(move |db| db.remove_member(room_id, remover, target))
        .await?;

    state
        .fanout
        .publish_room(
            room_id,
            &ServerEvent::MemberRemoved {
                room_id,
                user_id: target,
                removed_by: remover,
            },
        )
        .await;
    state.fanout.evict(room_id, target).await;
    Ok(Json(serde_json::json!({ "removed": true })))
}

async fn promote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((room_id, target)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let promoter = user.id;
    let changed = state
        .store
        .call(move |db| db.promote(room_id, promoter, target))
        .await?;

    let role = Role::Admin;
    if changed {
        state
            .fanout
            .publish_room(
                room_id,
                &ServerEvent::MemberPromoted {
                    room_id,
                    user_id: target,
                    role,
                },
            )
            .await;
    }
    Ok(Json(serde_json::json!({ "user_id": target, "role": role, "changed": changed })))
}

async fn active_members(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<Member>>, ServerError> {
    let window = state.fanout.presence_window();
    let members = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.active_members(room_id, window)
        })
        .await?;
    Ok(Json(members))
}

async fn messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let limit = query.limit.unwrap_or(CHAT_HISTORY_LIMIT);
    if limit == 0 || limit > MAX_HISTORY_PAGE {
        return Err(ServerError::BadRequest(format!(
            "limit must be between 1 and {MAX_HISTORY_PAGE}"
        )));
    }

    let history = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.room_messages(room_id, limit)
        })
        .await?;
    Ok(Json(history))
}

// ─── Shared content ───

#[derive(Deserialize)]
struct AnnotationRequest {
    text: String,
    position_start: u32,
    position_end: u32,
}

#[derive(Deserialize)]
struct QuizResultRequest {
    score: u32,
    total_questions: u32,
    time_taken_seconds: u32,
}

async fn share_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Json(draft): Json<NewContent>,
) -> Result<(StatusCode, Json<SharedContent>), ServerError> {
    let sharer = user.id;
    let content = state
        .store
        .call(move |db| db.share_content(room_id, sharer, &draft))
        .await?;

    state
        .fanout
        .publish_room(room_id, &ServerEvent::ContentShared(content.clone()))
        .await;
    Ok((StatusCode::CREATED, Json(content)))
}

async fn list_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<SharedContent>>, ServerError> {
    let content = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.list_content(room_id)
        })
        .await?;
    Ok(Json(content))
}

async fn get_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<Uuid>,
) -> Result<Json<SharedContent>, ServerError> {
    let content = state
        .store
        .call(move |db| {
            let content = db.get_content(content_id)?;
            db.member_role(content.room_id, user.id)?;
            Ok(content)
        })
        .await?;
    Ok(Json(content))
}

async fn annotate(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<Uuid>,
    Json(req): Json<AnnotationRequest>,
) -> Result<(StatusCode, Json<Annotation>), ServerError> {
    let user_id = user.id;
    let (room_id, annotation) = state
        .store
        .call(move |db| {
            let content = db.get_content(content_id)?;
            let annotation = db.annotate(
                content_id,
                user_id,
                &req.text,
                req.position_start,
                req.position_end,
            )?;
            Ok((content.room_id, annotation))
        })
        .await?;

    state
        .fanout
        .publish_room(
            room_id,
            &ServerEvent::AnnotationAdded {
                room_id,
                annotation: annotation.clone(),
            },
        )
        .await;
    Ok((StatusCode::CREATED, Json(annotation)))
}

async fn annotations(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<Uuid>,
) -> Result<Json<Vec<Annotation>>, ServerError> {
    let list = state
        .store
        .call(move |db| {
            let content = db.get_content(content_id)?;
            db.member_role(content.room_id, user.id)?;
            db.annotations(content_id)
        })
        .await?;
    Ok(Json(list))
}

async fn edits(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<Uuid>,
) -> Result<Json<Vec<EditRecord>>, ServerError> {
    let log = state
        .store
        .call(move |db| {
            let content = db.get_content(content_id)?;
            db.member_role(content.room_id, user.id)?;
            db.edits(content_id)
        })
        .await?;
    Ok(Json(log))
}

async fn submit_quiz_result(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<Uuid>,
    Json(req): Json<QuizResultRequest>,
) -> Result<Json<LeaderboardEntry>, ServerError> {
    let user_id = user.id;
    let (room_id, best, entries) = state
        .store
        .call(move |db| {
            let content = db.get_content(content_id)?;
            let best = db.record_quiz_result(
                content_id,
                user_id,
                req.score,
                req.total_questions,
                req.time_taken_seconds,
            )?;
            Ok((content.room_id, best, db.leaderboard(content_id)?))
        })
        .await?;

    state
        .fanout
        .publish_room(
            room_id,
            &ServerEvent::LeaderboardUpdated {
                content_id,
                entries,
            },
        )
        .await;
    Ok(Json(best))
}

async fn leaderboard(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<Uuid>,
) -> Result<Json<Vec<LeaderboardEntry>>, ServerError> {
    let entries = state
        .store
        .call(move |db| {
            let content = db.get_content(content_id)?;
            db.member_role(content.room_id, user.id)?;
            db.leaderboard(content_id)
        })
        .await?;
    Ok(Json(entries))
}

// ─── Sessions ───

#[derive(Deserialize)]
struct SessionListQuery {
    #[serde(default)]
    status: Option<SessionStatus>,
}

#[derive(Deserialize)]
struct UpcomingQuery {
    #[serde(default)]
    hours: Option<i64>,
}

#[derive(Deserialize)]
struct PositionRequest {
    position: u32,
}

#[derive(Deserialize)]
struct NotesRequest {
    notes_text: String,
}

async fn create_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Json(draft): Json<NewSession>,
) -> Result<(StatusCode, Json<Session>), ServerError> {
    let creator = user.id;
    let session = state
        .store
        .call(move |db| db.create_session(room_id, &draft, creator))
        .await?;

    state
        .fanout
        .publish_room(room_id, &ServerEvent::SessionCreated(session.clone()))
        .await;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<Vec<Session>>, ServerError> {
    let sessions = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.list_sessions(room_id, query.status)
        })
        .await?;
    Ok(Json(sessions))
}

async fn active_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Option<Session>>, ServerError> {
    let session = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.get_active_session(room_id)
        })
        .await?;
    Ok(Json(session))
}

async fn upcoming_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UpcomingQuery>,
) -> Result<Json<Vec<UpcomingSession>>, ServerError> {
    let hours = query.hours.unwrap_or(UPCOMING_HOURS);
    if !(1..=MAX_UPCOMING_HOURS).contains(&hours) {
        return Err(ServerError::BadRequest(format!(
            "hours must be between 1 and {MAX_UPCOMING_HOURS}"
        )));
    }

    let sessions = state
        .store
        .call(move |db| db.upcoming_sessions(user.id, hours))
        .await?;
    Ok(Json(sessions))
}

async fn start_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, ServerError> {
    let session = state
        .store
        .call(move |db| db.start_session(session_id, user.id))
        .await?;

    let event = ServerEvent::SessionStarted(session.clone());
    state.fanout.publish_room(session.room_id, &event).await;
    state.fanout.publish_session(session_id, &event).await;
    Ok(Json(session))
}

async fn end_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ServerError> {
    let (session, summary) = state
        .store
        .call(move |db| {
            let session = db.end_session(session_id, user.id)?;
            Ok((session, db.summarize(session_id)?))
        })
        .await?;

    let room_id = session.room_id;
    let event = ServerEvent::SessionEnded {
        session,
        summary: summary.clone(),
    };
    state.fanout.publish_room(room_id, &event).await;
    state.fanout.publish_session(session_id, &event).await;
    Ok(Json(summary))
}

async fn join_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionParticipant>, ServerError> {
    let participant = state
        .store
        .call(move |db| db.join_session(session_id, user.id))
        .await?;

    state
        .fanout
        .publish_session(
            session_id,
            &ServerEvent::ParticipantJoined {
                session_id,
                user_id: participant.user_id,
                name: participant.name.clone(),
                joined_at: participant.joined_at,
            },
        )
        .await;
    Ok(Json(participant))
}

async fn participants(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<SessionParticipant>>, ServerError> {
    let list = state
        .store
        .call(move |db| {
            let session = db.get_session(session_id)?;
            db.member_role(session.room_id, user.id)?;
            db.participants(session_id)
        })
        .await?;
    Ok(Json(list))
}

/// Relay a participant's position in the session material. Positions are
/// not stored.
async fn sync_position(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
    Json(req): Json<PositionRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user_id = user.id;
    state
        .store
        .call(move |db| {
            let session = db.get_session(session_id)?;
            db.member_role(session.room_id, user_id)
        })
        .await?;

    state
        .fanout
        .publish_session(
            session_id,
            &ServerEvent::PositionSynced {
                session_id,
                user_id,
                position: req.position,
            },
        )
        .await;
    Ok(Json(serde_json::json!({ "position": req.position })))
}

async fn session_summary(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSummary>, ServerError> {
    let summary = state
        .store
        .call(move |db| {
            let session = db.get_session(session_id)?;
            db.member_role(session.room_id, user.id)?;
            db.summarize(session_id)
        })
        .await?;
    Ok(Json(summary))
}

async fn save_notes(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
    Json(req): Json<NotesRequest>,
) -> Result<Json<SessionNote>, ServerError> {
    let note = state
        .store
        .call(move |db| db.save_notes(session_id, user.id, &req.notes_text))
        .await?;
    Ok(Json(note))
}

async fn session_notes(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<SessionNote>>, ServerError> {
    let notes = state
        .store
        .call(move |db| {
            let session = db.get_session(session_id)?;
            db.member_role(session.room_id, user.id)?;
            db.notes(session_id)
        })
        .await?;
    Ok(Json(notes))
}

// ─── Progress ───

#[derive(Deserialize)]
struct ProgressRequest {
    skill_id: String,
    #[serde(default)]
    mastery_score: Option<f64>,
    #[serde(default)]
    questions_answered: u32,
    #[serde(default)]
    correct_answers: u32,
}

#[derive(Deserialize)]
struct AnswerRequest {
    skill_id: String,
    correct: bool,
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default)]
    skill_id: Option<String>,
}

#[derive(Deserialize)]
struct StreakQuery {
    #[serde(default)]
    room_id: Option<Uuid>,
}

async fn record_progress(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<ProgressRecord>, ServerError> {
    let record = state
        .store
        .call(move |db| {
            db.record_progress(
                room_id,
                &req.skill_id,
                user.id,
                req.mastery_score,
                req.questions_answered,
                req.correct_answers,
            )
        })
        .await?;
    Ok(Json(record))
}

/// Score one answered question: refresh the external mastery estimate,
/// then fold the answer into the caller's progress.
async fn submit_answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<ProgressRecord>, ServerError> {
    let user_id = user.id;
    let skill_id = req.skill_id.trim().to_string();
    if skill_id.is_empty() {
        return Err(ServerError::BadRequest("skill_id is required".into()));
    }

    // Refuse outsiders before reaching out to the mastery service.
    state
        .store
        .call(move |db| db.member_role(room_id, user_id))
        .await?;

    let mastery = state
        .mastery
        .estimate_after_answer(user_id, &skill_id, req.correct)
        .await;

    let skill = skill_id.clone();
    let correct = u32::from(req.correct);
    let record = state
        .store
        .call(move |db| db.record_progress(room_id, &skill, user_id, mastery, 1, correct))
        .await?;

    state
        .fanout
        .publish_room(
            room_id,
            &ServerEvent::AnswerSubmitted {
                room_id,
                user_id,
                skill_id,
                correct: req.correct,
                mastery: record.mastery_score,
            },
        )
        .await;
    Ok(Json(record))
}

async fn group_stats(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<SkillStats>>, ServerError> {
    let stats = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.group_stats(room_id, query.skill_id.as_deref())
        })
        .await?;
    Ok(Json(stats))
}

async fn room_analytics(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomAnalytics>, ServerError> {
    let analytics = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.room_analytics(room_id)
        })
        .await?;
    Ok(Json(analytics))
}

async fn my_analytics(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<UserSkillAnalytics>>, ServerError> {
    let analytics = state
        .store
        .call(move |db| {
            db.member_role(room_id, user.id)?;
            db.user_analytics(room_id, user.id)
        })
        .await?;
    Ok(Json(analytics))
}

async fn streak(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<StreakQuery>,
) -> Result<Json<Streak>, ServerError> {
    let streak = state
        .store
        .call(move |db| db.streak(user.id, query.room_id))
        .await?;
    Ok(Json(streak))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use cohort_shared::types::ChannelKey;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::hub::Hub;

    struct TestApp {
        _dir: tempfile::TempDir,
        router: Router,
        fanout: Arc<Fanout>,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            database_path: dir.path().join("api.db"),
            // Nothing listens here; answers fall back to stored mastery.
            mastery_base_url: "http://127.0.0.1:9".into(),
            mastery_timeout: Duration::from_millis(300),
            ..ServerConfig::default()
        };
        let store = Store::open(&config.database_path, 2, config.store_timeout).unwrap();
        let fanout = Arc::new(Fanout::new(
            store.clone(),
            Hub::new(config.connection_buffer),
            config.presence_window,
        ));
        let mastery =
            MasteryClient::new(&config.mastery_base_url, config.mastery_timeout).unwrap();
        let router = build_router(AppState {
            store,
            fanout: fanout.clone(),
            mastery,
        });
        TestApp {
            _dir: dir,
            router,
            fanout,
        }
    }

    impl TestApp {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            user: Option<(Uuid, &str)>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some((id, name)) = user {
                req = req
                    .header("x-user-id", id.to_string())
                    .header("x-user-name", name)
                    .header("x-user-email", format!("{}@example.com", name.to_lowercase()));
            }
            let req = match body {
                Some(body) => req
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(req).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, value)
        }

        async fn create_room(&self, owner: (Uuid, &str), max: u32) -> Value {
            let (status, room) = self
                .call(
                    Method::POST,
                    "/rooms",
                    Some(owner),
                    Some(json!({ "name": "Calculus", "max_participants": max })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            room
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_identity_is_required() {
        let app = test_app();
        let (status, body) = app.call(Method::GET, "/rooms/mine", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "permission_denied");
    }

    #[tokio::test]
    async fn test_two_seat_room() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let guest = (Uuid::new_v4(), "Guest");
        let late = (Uuid::new_v4(), "Late");

        let room = app.create_room(owner, 2).await;
        let code = room["code"].as_str().unwrap().to_lowercase();

        let (status, joined) = app
            .call(Method::POST, &format!("/rooms/code/{code}/join"), Some(guest), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["joined"], true);

        let (status, body) = app
            .call(Method::POST, &format!("/rooms/code/{code}/join"), Some(late), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "full");

        let (_, mine) = app.call(Method::GET, "/rooms/mine", Some(guest), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        assert_eq!(mine[0]["member_count"], 2);
    }

    #[tokio::test]
    async fn test_reads_are_member_only() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let stranger = (Uuid::new_v4(), "Stranger");
        let room = app.create_room(owner, 10).await;
        let room_id = room["id"].as_str().unwrap();

        let (status, _) = app
            .call(Method::GET, &format!("/rooms/{room_id}"), Some(owner), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .call(Method::GET, &format!("/rooms/{room_id}"), Some(stranger), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "permission_denied");

        let (status, _) = app
            .call(
                Method::GET,
                &format!("/rooms/{}", Uuid::new_v4()),
                Some(owner),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let room = app.create_room(owner, 10).await;
        let room_id = room["id"].as_str().unwrap();

        let (status, session) = app
            .call(
                Method::POST,
                &format!("/rooms/{room_id}/sessions"),
                Some(owner),
                Some(json!({ "title": "Limits", "scheduled_at": chrono::Utc::now() })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["status"], "scheduled");
        let session_id = session["id"].as_str().unwrap();

        let start = format!("/sessions/{session_id}/start");
        let (status, started) = app.call(Method::POST, &start, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["status"], "active");

        let (status, body) = app.call(Method::POST, &start, Some(owner), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "invalid_transition");

        let (status, summary) = app
            .call(Method::POST, &format!("/sessions/{session_id}/end"), Some(owner), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["session"]["status"], "completed");
        assert_eq!(summary["room_name"], "Calculus");

        let (_, listed) = app
            .call(
                Method::GET,
                &format!("/rooms/{room_id}/sessions?status=completed"),
                Some(owner),
                None,
            )
            .await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_reach_subscribers() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let room = app.create_room(owner, 10).await;
        let room_id: Uuid = room["id"].as_str().unwrap().parse().unwrap();

        let (conn, mut rx) = app.fanout.hub().register(owner.0).await;
        app.fanout.join_room(conn, owner.0, room_id).await.unwrap();
        while rx.try_recv().is_ok() {}

        let (status, _) = app
            .call(
                Method::POST,
                &format!("/rooms/{room_id}/content"),
                Some(owner),
                Some(json!({
                    "content_type": "flashcards",
                    "title": "Derivatives",
                    "payload": { "cards": [{ "front": "d/dx x^2", "back": "2x" }] }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "content_shared");
        assert_eq!(frame["data"]["title"], "Derivatives");

        let (status, _) = app
            .call(Method::DELETE, &format!("/rooms/{room_id}"), Some(owner), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "room_deleted");
        assert!(!app.fanout.hub().is_subscribed(conn, ChannelKey::Room(room_id)).await);
    }

    #[tokio::test]
    async fn test_promotion_is_announced_once() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let guest = (Uuid::new_v4(), "Guest");
        let room = app.create_room(owner, 10).await;
        let room_id: Uuid = room["id"].as_str().unwrap().parse().unwrap();
        let (status, _) = app
            .call(Method::POST, &format!("/rooms/{room_id}/join"), Some(guest), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (conn, mut rx) = app.fanout.hub().register(owner.0).await;
        app.fanout.join_room(conn, owner.0, room_id).await.unwrap();
        while rx.try_recv().is_ok() {}

        let path = format!("/rooms/{room_id}/members/{}/promote", guest.0);
        let (status, body) = app.call(Method::POST, &path, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);
        let (status, body) = app.call(Method::POST, &path, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], false);
        assert_eq!(body["role"], "admin");

        let mut promoted = 0;
        while let Ok(frame) = rx.try_recv() {
            let frame: Value = serde_json::from_str(&frame).unwrap();
            if frame["event"] == "member_promoted" {
                promoted += 1;
            }
        }
        assert_eq!(promoted, 1);
    }

    #[tokio::test]
    async fn test_answer_without_mastery_service() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let room = app.create_room(owner, 10).await;
        let room_id = room["id"].as_str().unwrap();
        let answers = format!("/rooms/{room_id}/answers");

        let (status, record) = app
            .call(
                Method::POST,
                &answers,
                Some(owner),
                Some(json!({ "skill_id": "limits", "correct": true })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["questions_answered"], 1);
        assert_eq!(record["correct_answers"], 1);

        let (status, _) = app
            .call(
                Method::POST,
                &answers,
                Some((Uuid::new_v4(), "Stranger")),
                Some(json!({ "skill_id": "limits", "correct": true })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, stats) = app
            .call(Method::GET, &format!("/rooms/{room_id}/stats"), Some(owner), None)
            .await;
        assert_eq!(stats[0]["skill_id"], "limits");
        assert_eq!(stats[0]["total_questions"], 1);
    }

    #[tokio::test]
    async fn test_history_limit_is_validated() {
        let app = test_app();
        let owner = (Uuid::new_v4(), "Owner");
        let room = app.create_room(owner, 10).await;
        let room_id = room["id"].as_str().unwrap();

        let (status, body) = app
            .call(
                Method::GET,
                &format!("/rooms/{room_id}/messages?limit=0"),
                Some(owner),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");

        let (status, body) = app
            .call(
                Method::GET,
                &format!("/rooms/{room_id}/messages"),
                Some(owner),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }
}
