use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::{QuantaClock, QuantaInstant},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use nonzero_ext::nonzero;
use rand::Rng;
use std::{num::NonZeroU32, time::Duration};

// The listing portal starts answering 403 well before this.
const REQ_PER_MIN: NonZeroU32 = nonzero!(30u32);
// No two listing requests closer than this.
const MS_BETWEEN_REQ: Duration = Duration::from_millis(400);

type SpecificGovernorRateLimiter =
    GovernorRateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

pub struct RateLimiter {
    req_per_min: SpecificGovernorRateLimiter,
    ms_between_req: SpecificGovernorRateLimiter,
}

impl RateLimiter {
    pub fn new() -> Self {
        let req_per_min = GovernorRateLimiter::direct(Quota::per_minute(REQ_PER_MIN));
        let ms_between_req = GovernorRateLimiter::direct(
            Quota::with_period(MS_BETWEEN_REQ).expect("non-zero request period"),
        );

        RateLimiter {
            req_per_min,
            ms_between_req,
        }
    }

    pub async fn wait_until_ready(&self) {
        // Average first, then spacing: a burst cleared by the per-minute quota still
        // trickles out one request per period.
        self.req_per_min.until_ready().await;
        self.ms_between_req.until_ready().await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// A uniformly random duration in `[low, high)`; `low` when the range is empty.
pub fn random_between(low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    rand::rng().random_range(low..high)
}
