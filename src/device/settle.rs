use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::device::constants::{SETTLE_DELAY, SETTLE_RETRIES};
use crate::error::DeviceError;
use crate::scale::traits::Buzzer;

/**
 * The scale never acknowledges a command. A toggle is only observable once a later
 * notification frame reports the new state, so toggles are followed by polling.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlePolicy {
    pub interval_ms: u64,
    pub retries: u32,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy {
            interval_ms: SETTLE_DELAY,
            retries: SETTLE_RETRIES,
        }
    }
}

impl SettlePolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn budget(&self) -> Duration {
        self.interval() * self.retries
    }
}

pub async fn wait_for_state<F>(observe: F, target: bool, policy: &SettlePolicy) -> Result<(), DeviceError>
where
    F: Fn() -> bool,
{
    for _ in 0..policy.retries {
        if observe() == target {
            return Ok(());
        }
        sleep(policy.interval()).await;
    }

    Err(DeviceError::SettleTimeout { target, budget: policy.budget() })
}

async fn wait_for_buzzer<B: Buzzer + ?Sized>(buzzer: &B, target: bool, policy: &SettlePolicy) -> Result<(), DeviceError> {
    wait_for_state(|| buzzer.is_buzzing_on_touch(), target, policy).await
}

// on, settle, off, settle
async fn buzz_and_restore<B: Buzzer + ?Sized>(buzzer: &B, policy: &SettlePolicy) -> Result<(), DeviceError> {
    buzzer.toggle_buzzing_on_touch().await?;
    wait_for_buzzer(buzzer, true, policy).await?;
    buzzer.toggle_buzzing_on_touch().await?;
    wait_for_buzzer(buzzer, false, policy).await
}

async fn buzz_cycles<B: Buzzer + ?Sized>(buzzer: &B, n: i32, policy: &SettlePolicy) -> Result<(), DeviceError> {
    for _ in 0..n {
        buzz_and_restore(buzzer, policy).await?;
    }
    Ok(())
}

/// Beeps `n` times by toggling the buzz-on-touch setting, which beeps whenever it is enabled.
///
/// If the setting starts enabled it is disabled first and re-enabled at the end; the
/// re-enable is the last beep. An error while re-enabling is returned even if all beeps
/// happened, and takes precedence over an earlier error.
pub async fn buzz<B: Buzzer + ?Sized>(buzzer: &B, n: i32, policy: &SettlePolicy) -> Result<(), DeviceError> {
    if n <= 0 {
        return Err(DeviceError::InvalidBuzzCount(n));
    }

    if !buzzer.is_buzzing_on_touch() {
        return buzz_cycles(buzzer, n, policy).await;
    }

    buzzer.toggle_buzzing_on_touch().await?;
    wait_for_buzzer(buzzer, false, policy).await?;

    let result = buzz_cycles(buzzer, n - 1, policy).await;

    let restored = async {
        buzzer.toggle_buzzing_on_touch().await?;
        wait_for_buzzer(buzzer, true, policy).await
    }.await;

    restored.and(result)
}
