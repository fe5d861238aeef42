//! DTR/RTS timing sequences for board reset and bootloader entry.
//!
//! Sequences are plain step lists executed in order against the session.
//! The first failing step aborts the sequence and its error is returned;
//! remaining steps are not attempted. Only one sequence runs at a time per
//! session.
//!
//! On common USB-UART auto-reset circuits DTR drives GPIO0/BOOT and RTS
//! drives EN/RESET through inverting transistors, which is why "assert RTS"
//! holds the chip in reset.

use crate::activity::ActivityEvent;
use crate::error::TransportResult;
use crate::session::TransportSession;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hold time of the reset pulse.
pub const RESET_PULSE: Duration = Duration::from_millis(100);

/// Time the chip is held in reset with the boot strap asserted.
pub const BOOTLOADER_HOLD: Duration = Duration::from_millis(50);

/// One action in a control-line sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStep {
    Dtr(bool),
    Rts(bool),
    Wait(Duration),
}

/// Pulse the chip's reset line and release it into normal boot.
pub const RESET_SEQUENCE: [ControlStep; 5] = [
    ControlStep::Dtr(false),
    ControlStep::Rts(true),
    ControlStep::Wait(RESET_PULSE),
    ControlStep::Dtr(true),
    ControlStep::Rts(false),
];

/// Reset the chip with the boot strap held so it starts in the ROM
/// bootloader.
pub const BOOTLOADER_SEQUENCE: [ControlStep; 7] = [
    ControlStep::Dtr(false),
    ControlStep::Rts(true),
    ControlStep::Wait(RESET_PULSE),
    ControlStep::Dtr(true),
    ControlStep::Rts(true),
    ControlStep::Wait(BOOTLOADER_HOLD),
    ControlStep::Rts(false),
];

/// Runs control-line sequences against a session.
#[derive(Debug, Clone)]
pub struct ControlSequencer {
    session: Arc<TransportSession>,
}

impl ControlSequencer {
    pub fn new(session: Arc<TransportSession>) -> Self {
        Self { session }
    }

    /// Reset the attached board.
    pub async fn reset(&self) -> TransportResult<()> {
        self.execute("reset", &RESET_SEQUENCE).await
    }

    /// Reset the attached board into its bootloader.
    pub async fn enter_bootloader(&self) -> TransportResult<()> {
        self.execute("bootloader entry", &BOOTLOADER_SEQUENCE).await
    }

    async fn execute(&self, name: &str, steps: &[ControlStep]) -> TransportResult<()> {
        let _exclusive = self.session.lock_sequence().await;
        info!(sequence = name, steps = steps.len(), "running control sequence");
        self.session
            .emit(ActivityEvent::info(format!("Starting {name} sequence")));

        for (index, step) in steps.iter().enumerate() {
            debug!(sequence = name, index, step = ?step, "control step");
            let result = match *step {
                ControlStep::Dtr(level) => self.session.set_dtr(level).await,
                ControlStep::Rts(level) => self.session.set_rts(level).await,
                ControlStep::Wait(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(())
                }
            };

            if let Err(e) = result {
                warn!(sequence = name, index, error = %e, "control sequence aborted");
                self.session.emit(ActivityEvent::error(format!(
                    "{name} aborted at step {}: {e}",
                    index + 1
                )));
                return Err(e);
            }
        }

        self.session
            .emit(ActivityEvent::info(format!("Finished {name} sequence")));
        Ok(())
    }
}
