//! SIGINT/SIGTERM handling: flips a shared flag that the scheduler checks
//! at batch boundaries instead of tearing down mid-write.

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Register both signals against `flag`. The registration lives as long as
/// the process; there is nothing to unregister on a clean exit.
pub fn install(flag: Arc<AtomicBool>) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    Ok(())
}
