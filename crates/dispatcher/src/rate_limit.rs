//! Per-device sliding window frame limiter

use contracts::{DeviceId, RateLimitConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

struct Windows {
    devices: HashMap<DeviceId, VecDeque<Instant>>,
    last_cleanup: Instant,
}

/// Caps how many CAN frames one device may push per minute
pub struct RateLimiter {
    enabled: bool,
    max_per_window: usize,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_per_window: config.max_frames_per_minute as usize,
            windows: Mutex::new(Windows {
                devices: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Count one frame for `device`; false once its window is full
    pub fn check(&self, device: &DeviceId) -> bool {
        self.check_at(device, Instant::now())
    }

    pub fn check_at(&self, device: &DeviceId, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(windows.last_cleanup) > WINDOW {
            windows.devices.retain(|_, stamps| {
                prune(stamps, now);
                !stamps.is_empty()
            });
            windows.last_cleanup = now;
        }

        let stamps = windows.devices.entry(device.clone()).or_default();
        prune(stamps, now);
        if stamps.len() >= self.max_per_window {
            debug!(
                device_id = %device,
                max_frames_per_minute = self.max_per_window,
                "Device rate limit exceeded"
            );
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Devices with frames inside the current window
    pub fn tracked_devices(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .devices
            .len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = stamps.front() {
        if now.saturating_duration_since(*front) > WINDOW {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::device;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            max_frames_per_minute: max,
        })
    }

    #[test]
    fn test_limit_per_window() {
        let limiter = limiter(3);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at(&device(1), t0));
        }
        assert!(!limiter.check_at(&device(1), t0));
        assert!(!limiter.check_at(&device(1), t0 + Duration::from_secs(30)));
        // other devices are independent
        assert!(limiter.check_at(&device(2), t0));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(2);
        let t0 = Instant::now();
        assert!(limiter.check_at(&device(1), t0));
        assert!(limiter.check_at(&device(1), t0 + Duration::from_secs(30)));
        assert!(!limiter.check_at(&device(1), t0 + Duration::from_secs(45)));
        // first stamp has left the window
        assert!(limiter.check_at(&device(1), t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_idle_devices_cleaned_up() {
        let limiter = limiter(10);
        let t0 = Instant::now();
        limiter.check_at(&device(1), t0);
        limiter.check_at(&device(2), t0);
        assert_eq!(limiter.tracked_devices(), 2);

        limiter.check_at(&device(3), t0 + Duration::from_secs(125));
        assert_eq!(limiter.tracked_devices(), 1);
    }

    #[test]
    fn test_disabled_allows_everything() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            max_frames_per_minute: 1,
        });
        for _ in 0..100 {
            assert!(limiter.check(&device(1)));
        }
        assert_eq!(limiter.tracked_devices(), 0);
    }
}
