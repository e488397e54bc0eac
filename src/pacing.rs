//! Randomized request pacing and user-agent rotation

use rand::Rng;
use rand::seq::IndexedRandom;
use std::time::Duration;

/// A uniformly random delay in `min..=max`.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Sleeps for a random delay in `min..=max`.
pub async fn pause(min: Duration, max: Duration) {
    let delay = random_delay(min, max);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

pub fn random_user_agent(user_agents: &[String]) -> &str {
    user_agents
        .choose(&mut rand::rng())
        .map_or("Mozilla/5.0", String::as_str)
}
