use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Beatify Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::get_state,
        crate::routes::sse::public_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisiblePhase,
            crate::dto::snapshot::GameSnapshot,
            crate::dto::snapshot::PlayerView,
            crate::dto::snapshot::SongView,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::JoinRequest,
            crate::dto::ws::SubmitRequest,
            crate::dto::ws::VolumeRequest,
            crate::dto::ws::ServerMessage,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Read-only game state"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "players", description = "WebSocket protocol for players and the admin"),
    )
)]
pub struct ApiDoc;
