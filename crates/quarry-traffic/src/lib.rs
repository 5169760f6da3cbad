//! Traffic shaping and anti-detection for the Quarry pipeline.
//!
//! Third-party sites actively detect automation, so every outbound request
//! goes through this layer: a token bucket enforces the long-run rate, a
//! randomized pacer makes inter-request gaps look human, a request monitor
//! watches for block patterns, and a session manager rotates identities and
//! honors robots.txt.

pub mod backoff;
pub mod bucket;
pub mod error;
pub mod limiter;
pub mod monitor;
pub mod robots;
pub mod session;

pub use backoff::BackoffCalculator;
pub use bucket::{ConsumeDecision, TokenBucket, TokenBucketConfig};
pub use error::{Result, TrafficError};
pub use limiter::{RateLimiter, RateLimiterConfig, RateLimiterFactory, RateLimiterStats};
pub use monitor::{
    AlertType, MonitorAlert, MonitorStats, RequestMonitor, RequestMonitorConfig, RequestOutcome,
    RequestRecord,
};
pub use robots::{parse_robots, RobotsRules};
pub use session::{
    HttpRobotsFetcher, RobotsFetcher, SessionConfig, SessionManager, SessionState,
};
