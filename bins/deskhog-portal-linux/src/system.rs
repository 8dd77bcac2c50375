//! Restart hook for a host process.

use deskhog_core::SystemControl;
use tracing::warn;

/// Exit code a supervisor (systemd `Restart=on-failure`, a shell loop)
/// treats as "start again".
pub const RESTART_EXIT_CODE: i32 = 75;

pub struct ProcessRestart;

impl SystemControl for ProcessRestart {
    fn restart(&self) {
        warn!(code = RESTART_EXIT_CODE, "Exiting for restart");
        std::process::exit(RESTART_EXIT_CODE);
    }
}
