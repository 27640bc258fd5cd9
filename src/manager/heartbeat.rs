use std::time::Duration;

use tokio::time::Instant;

/// Heartbeat bookkeeping for one connection.
///
/// Owns both clocks of the liveness protocol, the repeating ping tick and
/// the optional pong deadline, so stopping it cancels every timer at once
/// and none can fire against a torn-down transport.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    ping_interval: Duration,
    pong_deadline: Duration,
    max_missed_pongs: u32,
    next_ping: Option<Instant>,
    pong_due: Option<Instant>,
    missed: u32,
}

impl Heartbeat {
    pub fn new(ping_interval: Duration, pong_deadline: Duration, max_missed_pongs: u32) -> Self {
        Self {
            ping_interval,
            pong_deadline,
            max_missed_pongs,
            next_ping: None,
            pong_due: None,
            missed: 0,
        }
    }

    /// Arm the ping clock, one full interval from now.
    pub fn start(&mut self) {
        self.next_ping = Some(Instant::now() + self.ping_interval);
        self.pong_due = None;
        self.missed = 0;
    }

    /// Disarm both clocks and forget the missed count.
    pub fn stop(&mut self) {
        self.next_ping = None;
        self.pong_due = None;
        self.missed = 0;
    }

    pub fn ping_tick(&self) -> Option<Instant> {
        self.next_ping
    }

    pub fn pong_tick(&self) -> Option<Instant> {
        self.pong_due
    }

    /// A probe went out: schedule the next one and arm the reply deadline.
    pub fn on_ping_sent(&mut self) {
        let now = Instant::now();
        self.next_ping = Some(now + self.ping_interval);
        self.pong_due = Some(now + self.pong_deadline);
    }

    /// A reply arrived. This is the only event that disarms a pending
    /// deadline; ordinary traffic does not count as liveness.
    pub fn on_pong(&mut self) {
        self.pong_due = None;
        self.missed = 0;
    }

    /// The reply deadline passed. Returns true when the missed count has
    /// reached the cap and the connection must be considered dead.
    pub fn on_deadline_elapsed(&mut self) -> bool {
        self.pong_due = None;
        self.missed += 1;
        log::warn!("pong missed, {}/{}", self.missed, self.max_missed_pongs);
        self.missed >= self.max_missed_pongs
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(30), Duration::from_secs(10), 3)
    }

    #[test]
    fn starts_with_ping_armed_only() {
        let mut hb = heartbeat();
        hb.start();

        assert!(hb.ping_tick().is_some());
        assert!(hb.pong_tick().is_none());
    }

    #[test]
    fn ping_sent_arms_the_deadline() {
        let mut hb = heartbeat();
        hb.start();
        hb.on_ping_sent();

        let pong = hb.pong_tick().unwrap();
        let ping = hb.ping_tick().unwrap();
        assert!(pong < ping);
    }

    #[test]
    fn third_miss_reports_dead() {
        let mut hb = heartbeat();
        hb.start();

        assert!(!hb.on_deadline_elapsed());
        assert!(!hb.on_deadline_elapsed());
        assert!(hb.on_deadline_elapsed());
    }

    #[test]
    fn pong_resets_the_missed_count() {
        let mut hb = heartbeat();
        hb.start();

        assert!(!hb.on_deadline_elapsed());
        assert!(!hb.on_deadline_elapsed());
        hb.on_pong();
        assert!(!hb.on_deadline_elapsed());
        assert!(!hb.on_deadline_elapsed());
    }

    #[test]
    fn pong_disarms_a_pending_deadline() {
        let mut hb = heartbeat();
        hb.start();
        hb.on_ping_sent();
        hb.on_pong();

        assert!(hb.pong_tick().is_none());
    }

    #[test]
    fn stop_disarms_everything() {
        let mut hb = heartbeat();
        hb.start();
        hb.on_ping_sent();
        hb.stop();

        assert!(hb.ping_tick().is_none());
        assert!(hb.pong_tick().is_none());
    }
}
