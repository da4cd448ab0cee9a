//! Background loops spawned by the controller.
//!
//! Each loop captures its session id (and countdown id) at spawn time and
//! exits silently once its token is cancelled or the controller reports the
//! ids as stale.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{self, Ticker};

use super::{
    controller::{SessionController, TickOutcome},
    state::Countdown,
};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub(crate) async fn activity_loop(
    controller: SessionController,
    session_id: Uuid,
    token: CancellationToken,
    interval: Duration,
) {
    log_debug!("activity loop started for session {session_id}");

    while !token.is_cancelled() {
        if !controller.perform_activity(session_id).await {
            break;
        }

        if !clock::pause(&token, interval).await {
            break;
        }
    }

    log_debug!("activity loop for session {session_id} exited");
}

pub(crate) async fn countdown_loop(
    controller: SessionController,
    session_id: Uuid,
    countdown: Countdown,
) {
    let mut ticker = Ticker::every_second();
    while ticker.tick(&countdown.token).await {
        if controller.on_countdown_tick(session_id, countdown.id).await == TickOutcome::Finished {
            break;
        }
    }
    log_debug!("countdown {} exited", countdown.id);
}

pub(crate) async fn grace_loop(controller: SessionController, session_id: Uuid, countdown: Countdown) {
    let mut ticker = Ticker::every_second();
    while ticker.tick(&countdown.token).await {
        if controller.on_grace_tick(session_id, countdown.id).await == TickOutcome::Finished {
            break;
        }
    }
    log_debug!("shutdown grace period {} exited", countdown.id);
}
