use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use shakmaty::Square;
use uuid::Uuid;

use crate::{
    error::SessionError,
    registry::SessionRegistry,
    session::{BattleStatus, GameSession, GameSnapshot, Mode, SelectOutcome},
    util::{parse_promotion, parse_square},
};

pub const SESSION_COOKIE: &str = "chess_session";

#[derive(Clone)]
pub struct AppState {
    registry: Arc<SessionRegistry>,
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    let state = AppState { registry };

    let api = Router::new()
        .route("/game_state", get(game_state))
        .route("/move", post(make_move))
        .route("/select_square", post(select_square))
        .route("/engine_move", post(engine_move))
        .route("/new_game", post(new_game))
        .route("/undo_move", post(undo_move))
        .route("/set_game_mode", post(set_game_mode))
        .route("/set_engine_settings", post(set_engine_settings))
        .route("/toggle_engine_battle", post(toggle_engine_battle))
        .route("/save_game", get(save_game))
        .route("/load_game", post(load_game))
        .route("/get_fen", get(get_fen))
        .route("/set_position", post(set_position));

    Router::new().nest("/api", api).with_state(state)
}

#[derive(Debug)]
enum ApiError {
    Session(SessionError),
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(error) => match error {
                SessionError::IllegalMove(_)
                | SessionError::InvalidSelection
                | SessionError::InvalidFen(_)
                | SessionError::CorruptGameFile(_) => StatusCode::BAD_REQUEST,
                SessionError::InvalidState(_) | SessionError::Busy | SessionError::Stale => {
                    StatusCode::CONFLICT
                }
                SessionError::EngineUnavailable(_)
                | SessionError::EngineCrashed(_)
                | SessionError::EngineTimeout => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::EngineStopped | SessionError::BattleFailed(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        ApiError::Session(error)
    }
}

impl Serialize for ApiError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ApiError::Session(error) => error.serialize(serializer),
            ApiError::BadRequest(message) => json!({ "code": "bad_request", "message": message })
                .serialize(serializer),
        }
    }
}

#[derive(Serialize)]
struct ApiReply {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    game_state: GameSnapshot,
}

type Outcome = Result<Option<Value>, ApiError>;

/// The calling session plus the cookie to hand out when it was just created.
struct Client {
    session: Arc<GameSession>,
    issued: Option<String>,
}

impl Client {
    async fn resolve(state: &AppState, headers: &HeaderMap) -> Client {
        match session_cookie(headers) {
            Some(id) => Client {
                session: state.registry.get_or_create(Some(&id)).await,
                issued: None,
            },
            None => {
                let session = state.registry.get_or_create(None).await;
                let issued = Some(session.id().to_string());
                Client { session, issued }
            }
        }
    }

    fn attach_cookie(&self, response: &mut Response) {
        let Some(id) = &self.issued else {
            return;
        };
        let cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    /// Wraps `outcome` with the snapshot taken after it.
    async fn reply(self, outcome: Outcome) -> Response {
        let game_state = self.session.get_state().await;
        let (status, body) = match outcome {
            Ok(result) => (
                StatusCode::OK,
                ApiReply {
                    success: true,
                    error: None,
                    result,
                    game_state,
                },
            ),
            Err(error) => {
                debug!("[{}] request refused: {error:?}", self.session.id());
                (
                    error.status(),
                    ApiReply {
                        success: false,
                        error: Some(error),
                        result: None,
                        game_state,
                    },
                )
            }
        };
        let mut response = (status, Json(body)).into_response();
        self.attach_cookie(&mut response);
        response
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
        .map(|id| id.to_string())
}

/// Empty bodies read as the all-defaults request.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed request: {e}")))
}

/// Starts the engine's answer in the background when one is due.
async fn kick_engine(session: &Arc<GameSession>) -> bool {
    session.auto_reply().await.is_some()
}

async fn game_state(State(state): State<AppState>, headers: HeaderMap) -> Response {
    Client::resolve(&state, &headers).await.reply(Ok(None)).await
}

#[derive(Deserialize, Default)]
struct MoveRequest {
    from: Option<String>,
    to: Option<String>,
    promotion: Option<String>,
}

async fn make_move(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome = play_move(&client.session, &body).await;
    client.reply(outcome).await
}

async fn play_move(session: &Arc<GameSession>, body: &Bytes) -> Outcome {
    let request: MoveRequest = parse_body(body)?;
    let (Some(from), Some(to)) = (
        request.from.as_deref().and_then(parse_square),
        request.to.as_deref().and_then(parse_square),
    ) else {
        return Err(ApiError::BadRequest(
            "a move needs valid from and to squares".to_string(),
        ));
    };
    let promotion = match request.promotion.as_deref() {
        Some(piece) => Some(
            parse_promotion(piece)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown promotion piece {piece}")))?,
        ),
        None => None,
    };

    let moved = session.apply_move(from, to, promotion).await?;
    let engine_replying = kick_engine(session).await;
    Ok(Some(json!({ "move": moved, "engine_replying": engine_replying })))
}

#[derive(Deserialize, Default)]
struct SelectRequest {
    square: Option<String>,
    file: Option<u8>,
    rank: Option<u8>,
}

impl SelectRequest {
    /// Either `"e2"` or zero-based file and rank indices.
    fn square(&self) -> Option<Square> {
        match (&self.square, self.file, self.rank) {
            (Some(name), _, _) => parse_square(name),
            (None, Some(file), Some(rank)) if file < 8 && rank < 8 => {
                parse_square(&format!("{}{}", char::from(b'a' + file), rank + 1))
            }
            _ => None,
        }
    }
}

async fn select_square(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome = click_square(&client.session, &body).await;
    client.reply(outcome).await
}

async fn click_square(session: &Arc<GameSession>, body: &Bytes) -> Outcome {
    let request: SelectRequest = parse_body(body)?;
    let square = request.square().ok_or(SessionError::InvalidSelection)?;
    let selected = session.select_square(square).await?;
    let engine_replying = match selected {
        SelectOutcome::Moved { .. } => kick_engine(session).await,
        SelectOutcome::Selected { .. } => false,
    };
    Ok(Some(json!({ "selection": selected, "engine_replying": engine_replying })))
}

async fn engine_move(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = Client::resolve(&state, &headers).await;
    // the task keeps running after its handle is dropped
    let outcome: Outcome = match client.session.request_engine_move().await {
        Ok(_) => Ok(None),
        Err(e) => Err(e.into()),
    };
    client.reply(outcome).await
}

async fn new_game(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome: Outcome = match client.session.new_game().await {
        Ok(()) => Ok(None),
        Err(e) => Err(e.into()),
    };
    client.reply(outcome).await
}

async fn undo_move(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome: Outcome = match client.session.undo().await {
        Ok(undone) => Ok(Some(json!({ "undone": undone }))),
        Err(e) => Err(e.into()),
    };
    client.reply(outcome).await
}

#[derive(Deserialize, Default)]
struct ModeRequest {
    mode: Option<String>,
}

async fn set_game_mode(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome = change_mode(&client.session, &body).await;
    client.reply(outcome).await
}

async fn change_mode(session: &Arc<GameSession>, body: &Bytes) -> Outcome {
    let request: ModeRequest = parse_body(body)?;
    let name = request
        .mode
        .unwrap_or_else(|| "player_vs_engine".to_string());
    let mode: Mode = serde_json::from_value(Value::String(name.clone()))
        .map_err(|_| ApiError::BadRequest(format!("unknown game mode {name}")))?;
    session.set_mode(mode).await?;
    let engine_replying = kick_engine(session).await;
    Ok(Some(json!({ "engine_replying": engine_replying })))
}

#[derive(Deserialize, Default)]
struct EngineSettingsRequest {
    #[serde(alias = "skill_level")]
    level: Option<i64>,
    time_limit: Option<f64>,
}

async fn set_engine_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome = configure_engine(&client.session, &body).await;
    client.reply(outcome).await
}

async fn configure_engine(session: &Arc<GameSession>, body: &Bytes) -> Outcome {
    let request: EngineSettingsRequest = parse_body(body)?;
    let config = session
        .set_engine_config(request.level, request.time_limit)
        .await?;
    Ok(Some(json!({
        "skill_level": config.skill_level(),
        "time_limit": config.think_time_secs(),
    })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum BattleAction {
    Start,
    Stop,
    #[default]
    Toggle,
}

#[derive(Deserialize, Default)]
struct BattleRequest {
    #[serde(default)]
    action: BattleAction,
}

async fn toggle_engine_battle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome = control_battle(&client.session, &body).await;
    client.reply(outcome).await
}

async fn control_battle(session: &Arc<GameSession>, body: &Bytes) -> Outcome {
    let request: BattleRequest = parse_body(body)?;
    let start = match request.action {
        BattleAction::Start => true,
        BattleAction::Stop => false,
        BattleAction::Toggle => session.battle_status().await == BattleStatus::Stopped,
    };
    if start {
        session.set_mode(Mode::EngineVsEngine).await?;
        session.start_battle().await?;
    } else {
        session.stop_battle().await;
    }
    Ok(Some(json!({ "battle_started": start })))
}

async fn save_game(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let pgn = client.session.export_pgn().await;
    let disposition = format!(
        "attachment; filename=\"chess_game_{}.pgn\"",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let mut response = (
        [
            (header::CONTENT_TYPE, "application/x-chess-pgn".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pgn,
    )
        .into_response();
    client.attach_cookie(&mut response);
    response
}

async fn load_game(State(state): State<AppState>, request: Request) -> Response {
    let client = Client::resolve(&state, request.headers()).await;
    let outcome = import_upload(&client.session, request).await;
    client.reply(outcome).await
}

async fn import_upload(session: &Arc<GameSession>, request: Request) -> Outcome {
    let text = read_upload(request).await?;
    session.import_pgn(&text).await?;
    Ok(None)
}

/// The game file, sent either as the raw body or as the `file` part of a
/// multipart form.
async fn read_upload(request: Request) -> Result<String, ApiError> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let bytes = if is_form {
        let mut form = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let mut upload = None;
        while let Some(field) = form
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            if field.name() == Some("file") {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                upload = Some(bytes);
                break;
            }
        }
        upload.ok_or_else(|| ApiError::BadRequest("no file uploaded".to_string()))?
    } else {
        Bytes::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
    };

    String::from_utf8(bytes.to_vec()).map_err(|_| {
        ApiError::Session(SessionError::CorruptGameFile(
            "the file is not UTF-8 text".to_string(),
        ))
    })
}

async fn get_fen(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let fen = client.session.get_fen().await;
    client.reply(Ok(Some(json!({ "fen": fen })))).await
}

#[derive(Deserialize, Default)]
struct PositionRequest {
    fen: Option<String>,
}

async fn set_position(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let client = Client::resolve(&state, &headers).await;
    let outcome = place_position(&client.session, &body).await;
    client.reply(outcome).await
}

async fn place_position(session: &Arc<GameSession>, body: &Bytes) -> Outcome {
    let request: PositionRequest = parse_body(body)?;
    let fen = request
        .fen
        .ok_or_else(|| ApiError::BadRequest("no FEN provided".to_string()))?;
    session.set_position(&fen).await?;
    Ok(None)
}
