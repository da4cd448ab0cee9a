use rand::Rng;

use crate::error::SimulationError;

/// One unit of simulated user input.
///
/// Implementations are selected at startup; the session controller only
/// decides *when* to call them.
pub trait ActivitySimulator: Send + Sync {
    /// Perform one action and describe it for the activity log.
    fn perform_one(&self) -> Result<String, SimulationError>;
}

/// Default simulator: picks a small mouse nudge or a `Shift` press at random
/// and reports it without touching the real input devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedInput;

const MAX_NUDGE_PX: i32 = 5;

impl ActivitySimulator for SimulatedInput {
    fn perform_one(&self) -> Result<String, SimulationError> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(0.5) {
            let dx = rng.gen_range(-MAX_NUDGE_PX..=MAX_NUDGE_PX);
            let dy = rng.gen_range(-MAX_NUDGE_PX..=MAX_NUDGE_PX);
            Ok(format!("Mouse moved by ({dx}, {dy}) pixels"))
        } else {
            Ok("Pressed 'Shift' key".to_string())
        }
    }
}
