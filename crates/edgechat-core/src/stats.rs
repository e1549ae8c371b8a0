use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BenchmarkResult, Stat};

pub const STAT_TIME_TO_FIRST_TOKEN: &str = "time_to_first_token";
pub const STAT_PREFILL_SPEED: &str = "prefill_speed";
pub const STAT_DECODE_SPEED: &str = "decode_speed";
pub const STAT_LATENCY: &str = "latency";

/// Stats shown under a completed response, in display order
pub fn llm_stats() -> Vec<Stat> {
    vec![
        Stat::new(STAT_TIME_TO_FIRST_TOKEN, "1st token", "sec"),
        Stat::new(STAT_PREFILL_SPEED, "Prefill speed", "tokens/s"),
        Stat::new(STAT_DECODE_SPEED, "Decode speed", "tokens/s"),
        Stat::new(STAT_LATENCY, "Latency", "sec"),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStats {
    pub prefill_tokens: usize,
    pub time_to_first_token_secs: f64,
    pub prefill_speed: f64,
    pub decode_tokens: u32,
    pub decode_speed: f64,
    pub latency_secs: f64,
}

impl BenchmarkStats {
    pub fn to_result(&self, attached_to: Uuid, accelerator: &str) -> BenchmarkResult {
        let values = BTreeMap::from([
            (STAT_TIME_TO_FIRST_TOKEN.to_string(), self.time_to_first_token_secs),
            (STAT_PREFILL_SPEED.to_string(), self.prefill_speed),
            (STAT_DECODE_SPEED.to_string(), self.decode_speed),
            (STAT_LATENCY.to_string(), self.latency_secs),
        ]);

        BenchmarkResult {
            id: Uuid::new_v4(),
            attached_to,
            ordered_stats: llm_stats(),
            values,
            running: false,
            accelerator: accelerator.to_string(),
        }
    }
}

/// Tokens per second, 0 when the division is not finite
pub fn tokens_per_sec(tokens: f64, secs: f64) -> f64 {
    let speed = tokens / secs;
    if speed.is_finite() {
        speed
    } else {
        0.0
    }
}

/// Running timing state for one streamed generation
#[derive(Debug, Clone)]
pub struct StreamTimer {
    prefill_tokens: usize,
    start: Instant,
    first_token_at: Option<Instant>,
    time_to_first_token_secs: f64,
    prefill_speed: f64,
    decode_tokens: u32,
}

impl StreamTimer {
    pub fn start(prefill_tokens: usize) -> Self {
        Self::start_at(prefill_tokens, Instant::now())
    }

    pub fn start_at(prefill_tokens: usize, start: Instant) -> Self {
        Self {
            prefill_tokens,
            start,
            first_token_at: None,
            time_to_first_token_secs: 0.0,
            prefill_speed: 0.0,
            decode_tokens: 0,
        }
    }

    pub fn record_event(&mut self) -> bool {
        self.record_event_at(Instant::now())
    }

    /// Count one stream event. Returns true for the first one.
    pub fn record_event_at(&mut self, now: Instant) -> bool {
        if self.first_token_at.is_some() {
            self.decode_tokens += 1;
            return false;
        }

        self.first_token_at = Some(now);
        self.time_to_first_token_secs = now.saturating_duration_since(self.start).as_secs_f64();
        self.prefill_speed = tokens_per_sec(self.prefill_tokens as f64, self.time_to_first_token_secs);
        true
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn decode_tokens(&self) -> u32 {
        self.decode_tokens
    }

    pub fn finish(&self) -> BenchmarkStats {
        self.finish_at(Instant::now())
    }

    pub fn finish_at(&self, now: Instant) -> BenchmarkStats {
        let first = self.first_token_at.unwrap_or(self.start);
        let decode_secs = now.saturating_duration_since(first).as_secs_f64();

        BenchmarkStats {
            prefill_tokens: self.prefill_tokens,
            time_to_first_token_secs: self.time_to_first_token_secs,
            prefill_speed: self.prefill_speed,
            decode_tokens: self.decode_tokens,
            decode_speed: tokens_per_sec(self.decode_tokens as f64, decode_secs),
            latency_secs: now.saturating_duration_since(self.start).as_secs_f64(),
        }
    }
}
