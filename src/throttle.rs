//! Auto-throttle (C8): a closed-loop controller that lowers a provider's
//! effective RPM after a burst of upstream 429s and restores it gradually once
//! the provider has been stable for a while.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct ThrottleState {
    pub original_rpm: u32,
    pub current_rpm: u32,
    pub throttle_factor: f64,
    pub spike_count: u32,
    pub last_spike_time: Option<Instant>,
    pub consecutive_stable_ticks: u32,
    pub is_throttled: bool,
    pub last_error_time: Option<Instant>,
    pub last_stability_reset: Option<Instant>,
}

impl ThrottleState {
    fn new(original_rpm: u32) -> Self {
        Self {
            original_rpm,
            current_rpm: original_rpm,
            throttle_factor: 1.0,
            spike_count: 0,
            last_spike_time: None,
            consecutive_stable_ticks: 0,
            is_throttled: false,
            last_error_time: None,
            last_stability_reset: Some(Instant::now()),
        }
    }
}

struct ProviderThrottle {
    state: ThrottleState,
    error_history: VecDeque<Instant>,
}

/// Tunable parameters; defaults match §4.7.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub spike_threshold: u32,
    pub spike_window: Duration,
    pub throttle_reduction: f64,
    pub restore_increment: f64,
    /// Number of `check_restore` ticks of stability required before a restore
    /// step; one tick models one minute in production use, but tests may call
    /// `check_restore` directly to simulate ticks without real sleeps.
    pub stable_duration_ticks: u32,
    pub re_throttle_cooldown: Duration,
    pub floor: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            spike_threshold: 3,
            spike_window: Duration::from_secs(60),
            throttle_reduction: 0.20,
            restore_increment: 0.10,
            stable_duration_ticks: 5,
            re_throttle_cooldown: Duration::from_secs(30),
            floor: 0.2,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThrottleStats {
    pub total_spikes: u64,
    pub total_throttles: u64,
    pub total_restores: u64,
}

pub struct AutoThrottle {
    config: ThrottleConfig,
    providers: RwLock<HashMap<String, ProviderThrottle>>,
    stats: RwLock<ThrottleStats>,
}

impl AutoThrottle {
    pub fn new() -> Self {
        Self::with_config(ThrottleConfig::default())
    }

    pub fn with_config(config: ThrottleConfig) -> Self {
        Self {
            config,
            providers: RwLock::new(HashMap::new()),
            stats: RwLock::new(ThrottleStats::default()),
        }
    }

    pub async fn register(&self, provider: impl Into<String>, original_rpm: u32) {
        let provider = provider.into();
        let mut providers = self.providers.write().await;
        providers
            .entry(provider)
            .or_insert_with(|| ProviderThrottle {
                state: ThrottleState::new(original_rpm),
                error_history: VecDeque::new(),
            });
    }

    /// Advisory RPM the limiter should admit at. `None` if the provider was
    /// never registered with auto-throttle (callers fall back to configured rpm).
    pub async fn current_rpm(&self, provider: &str) -> Option<u32> {
        self.providers
            .read()
            .await
            .get(provider)
            .map(|p| p.state.current_rpm)
    }

    pub async fn state(&self, provider: &str) -> Option<ThrottleState> {
        self.providers.read().await.get(provider).map(|p| p.state)
    }

    pub async fn stats(&self) -> ThrottleStats {
        *self.stats.read().await
    }

    /// Records a 429 observation; triggers a throttle step on spike detection.
    pub async fn record_error(&self, provider: &str) {
        let now = Instant::now();
        let mut providers = self.providers.write().await;
        let Some(entry) = providers.get_mut(provider) else {
            return;
        };

        entry.state.last_error_time = Some(now);
        entry.state.consecutive_stable_ticks = 0;
        entry.error_history.push_back(now);
        while let Some(&front) = entry.error_history.front() {
            if now.duration_since(front) > self.config.spike_window {
                entry.error_history.pop_front();
            } else {
                break;
            }
        }

        if entry.error_history.len() as u32 >= self.config.spike_threshold {
            self.trigger_spike(provider, entry, now).await;
        }
    }

    async fn trigger_spike(&self, provider: &str, entry: &mut ProviderThrottle, now: Instant) {
        if let Some(last) = entry.state.last_spike_time {
            if now.duration_since(last) < self.config.re_throttle_cooldown {
                return;
            }
        }

        let new_factor = (entry.state.throttle_factor * (1.0 - self.config.throttle_reduction))
            .max(self.config.floor);
        entry.state.throttle_factor = new_factor;
        entry.state.current_rpm = (entry.state.original_rpm as f64 * new_factor).round() as u32;
        entry.state.spike_count += 1;
        entry.state.last_spike_time = Some(now);
        entry.state.consecutive_stable_ticks = 0;
        entry.state.is_throttled = entry.state.current_rpm < entry.state.original_rpm;
        entry.state.last_stability_reset = Some(now);
        entry.state.last_error_time = None;

        tracing::warn!(
            provider,
            new_factor = entry.state.throttle_factor,
            new_rpm = entry.state.current_rpm,
            spike_count = entry.state.spike_count,
            "auto-throttle: reducing rpm after error spike"
        );

        let mut stats = self.stats.write().await;
        stats.total_spikes += 1;
        stats.total_throttles += 1;
    }

    /// Call periodically (production: ~once/minute) to progress restoration.
    /// Returns true if a restore step was applied this call.
    pub async fn check_restore(&self, provider: &str) -> bool {
        let mut providers = self.providers.write().await;
        let Some(entry) = providers.get_mut(provider) else {
            return false;
        };

        if !entry.state.is_throttled {
            return false;
        }

        if let (Some(last_error), Some(last_reset)) =
            (entry.state.last_error_time, entry.state.last_stability_reset)
        {
            if last_error > last_reset {
                entry.state.consecutive_stable_ticks = 0;
                return false;
            }
        }

        entry.state.consecutive_stable_ticks += 1;
        if entry.state.consecutive_stable_ticks < self.config.stable_duration_ticks {
            return false;
        }

        let new_factor =
            (entry.state.throttle_factor * (1.0 + self.config.restore_increment)).min(1.0);
        entry.state.throttle_factor = new_factor;
        entry.state.current_rpm = (entry.state.original_rpm as f64 * new_factor).round() as u32;
        entry.state.consecutive_stable_ticks = 0;
        entry.state.is_throttled = entry.state.current_rpm < entry.state.original_rpm;
        entry.state.last_stability_reset = Some(Instant::now());
        entry.state.last_error_time = None;

        drop(providers);
        let mut stats = self.stats.write().await;
        stats.total_restores += 1;
        true
    }
}

impl Default for AutoThrottle {
    fn default() -> Self {
        Self::new()
    }
}
