//! Configuration for the call engine.

use std::time::Duration;

/// Timing bounds for call setup and supervision.
///
/// The exact durations are deployment tuning, not protocol behavior;
/// the defaults mirror what the production clients ship with.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long an outgoing call waits for the signaling channel to
    /// report connected before aborting with `ConnectTimeout`.
    pub outgoing_connect_wait: Duration,
    /// Same bound for the accept path of an incoming call.
    pub accept_connect_wait: Duration,
    /// How long an outgoing offer waits for any remote answer or media
    /// before the controller reports no-answer.
    pub no_answer_timeout: Duration,
    /// Interval of the elapsed-duration tick while connected.
    pub tick_interval: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            outgoing_connect_wait: Duration::from_secs(8),
            accept_connect_wait: Duration::from_secs(5),
            no_answer_timeout: Duration::from_secs(45),
            tick_interval: Duration::from_secs(1),
        }
    }
}
