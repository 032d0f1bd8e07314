/// OpenAPI documentation generation.
pub mod documentation;
/// Snapshot fan-out to WebSocket clients and SSE subscribers.
pub mod events;
/// Action dispatch and playback side effects.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Playback device abstraction.
pub mod playback;
/// Public service for read-only game information.
pub mod public_service;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Background timer driving deadlines and reconnection windows.
pub mod ticker;
/// WebSocket connection and message handling service.
pub mod websocket_service;
