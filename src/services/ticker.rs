use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use crate::{services::game_service, state::SharedState};

/// Drive round deadlines and reconnection windows until the runtime shuts down.
pub async fn run(state: SharedState) {
    let period = state.config().tick_interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period_ms = period.as_millis() as u64, "game ticker started");

    loop {
        ticker.tick().await;
        game_service::tick(&state).await;
    }
}
