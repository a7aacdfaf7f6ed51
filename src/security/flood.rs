//! Per-connection command penalty accounting.
//!
//! Every command charges a cost in milliseconds of "penalty credit"; credit
//! drains at 1000 ms per wall-clock second. While accumulated credit stays
//! under `max_penalty` commands run immediately; past it, processing is
//! deferred until enough credit has drained. A client that keeps pushing
//! past the deferral margin is terminated with `ERROR :Flood`.

use std::time::{Duration, Instant};

/// Penalty cost of a command, in milliseconds.
pub fn command_cost(command: &str) -> u64 {
    match command {
        "PRIVMSG" | "NOTICE" => 1000,
        "JOIN" => 1500,
        "MODE" => 2000,
        "WHO" | "WHOIS" | "LIST" => 3000,
        "PING" | "PONG" => 100,
        _ => 1000,
    }
}

/// Verdict for one command charge.
#[derive(Debug, PartialEq, Eq)]
pub enum FloodVerdict {
    /// Process immediately.
    Proceed,
    /// Process after waiting for credit to drain.
    Defer(Duration),
    /// Deferred backlog exceeded; close with `ERROR :Flood`.
    Terminate,
}

/// Per-connection penalty meter.
#[derive(Debug)]
pub struct PenaltyMeter {
    credit_ms: u64,
    last_drain: Instant,
    max_penalty_ms: u64,
    /// Extra credit tolerated beyond the threshold before termination.
    terminate_margin_ms: u64,
}

impl PenaltyMeter {
    /// `max_penalty_ms` is the deferral threshold (default 10 000 ms);
    /// `terminate_margin_ms` how far past it a client may push while
    /// deferred before the connection is dropped.
    pub fn new(max_penalty_ms: u64, terminate_margin_ms: u64) -> Self {
        Self {
            credit_ms: 0,
            last_drain: Instant::now(),
            max_penalty_ms,
            terminate_margin_ms,
        }
    }

    fn drain(&mut self) {
        let now = Instant::now();
        // 1000 ms of credit per wall second: elapsed milliseconds drain 1:1.
        let elapsed_ms = now.duration_since(self.last_drain).as_millis() as u64;
        self.credit_ms = self.credit_ms.saturating_sub(elapsed_ms);
        self.last_drain = now;
    }

    /// Charge one command and decide how to proceed.
    pub fn charge(&mut self, cost_ms: u64) -> FloodVerdict {
        self.drain();
        self.credit_ms = self.credit_ms.saturating_add(cost_ms);

        if self.credit_ms <= self.max_penalty_ms {
            return FloodVerdict::Proceed;
        }
        if self.credit_ms > self.max_penalty_ms + self.terminate_margin_ms {
            return FloodVerdict::Terminate;
        }
        // Wait until the excess over the threshold has drained.
        let wait_ms = self.credit_ms - self.max_penalty_ms;
        FloodVerdict::Defer(Duration::from_millis(wait_ms))
    }

    /// Add a one-off penalty (e.g. failed OPER attempts) without a verdict.
    pub fn penalize(&mut self, cost_ms: u64) {
        self.drain();
        self.credit_ms = self.credit_ms.saturating_add(cost_ms);
    }

    /// Current credit, for tests and introspection.
    pub fn credit_ms(&self) -> u64 {
        self.credit_ms
    }
}

impl Default for PenaltyMeter {
    fn default() -> Self {
        Self::new(10_000, 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn costs_match_policy() {
        assert_eq!(command_cost("PRIVMSG"), 1000);
        assert_eq!(command_cost("JOIN"), 1500);
        assert_eq!(command_cost("MODE"), 2000);
        assert_eq!(command_cost("WHO"), 3000);
        assert_eq!(command_cost("WHOIS"), 3000);
        assert_eq!(command_cost("LIST"), 3000);
        assert_eq!(command_cost("PING"), 100);
        assert_eq!(command_cost("TOPIC"), 1000);
    }

    #[test]
    fn under_threshold_proceeds() {
        let mut meter = PenaltyMeter::new(10_000, 10_000);
        for _ in 0..10 {
            assert_eq!(meter.charge(1000), FloodVerdict::Proceed);
        }
    }

    #[test]
    fn over_threshold_defers_then_terminates() {
        let mut meter = PenaltyMeter::new(10_000, 5_000);
        for _ in 0..10 {
            meter.charge(1000);
        }
        // 11th command tips over the threshold.
        match meter.charge(1000) {
            FloodVerdict::Defer(wait) => assert!(wait <= Duration::from_millis(1000)),
            other => panic!("expected defer, got {other:?}"),
        }
        // Pushing far past the margin terminates.
        for _ in 0..5 {
            meter.charge(1000);
        }
        assert_eq!(meter.charge(1000), FloodVerdict::Terminate);
    }

    #[test]
    fn credit_drains_over_time() {
        let mut meter = PenaltyMeter::new(10_000, 10_000);
        meter.charge(3000);
        std::thread::sleep(Duration::from_millis(120));
        meter.charge(0);
        assert!(meter.credit_ms() < 3000);
    }
}
