use extract::Stage;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct PipelineMetrics {
    // Runs
    runs_started: AtomicUsize,
    runs_completed: AtomicUsize,
    runs_failed: AtomicUsize,

    // Timing per stage (in microseconds), indexed by stage order
    stage_time_us: [AtomicU64; Stage::ALL.len()],
    stage_runs: [AtomicUsize; Stage::ALL.len()],

    // Counts
    item_failures: AtomicUsize,
    claims_extracted: AtomicUsize,
    questions_produced: AtomicUsize,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs_started: AtomicUsize::new(0),
            runs_completed: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            stage_time_us: Default::default(),
            stage_runs: Default::default(),
            item_failures: AtomicUsize::new(0),
            claims_extracted: AtomicUsize::new(0),
            questions_produced: AtomicUsize::new(0),
        })
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run(&self, success: bool) {
        if success {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration, item_failures: usize) {
        let index = stage as usize;
        self.stage_time_us[index].fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.stage_runs[index].fetch_add(1, Ordering::Relaxed);
        self.item_failures.fetch_add(item_failures, Ordering::Relaxed);
    }

    pub fn record_claims(&self, claims: usize) {
        self.claims_extracted.fetch_add(claims, Ordering::Relaxed);
    }

    pub fn record_questions(&self, questions: usize) {
        self.questions_produced.fetch_add(questions, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            stages: Stage::ALL
                .iter()
                .map(|&stage| StageTiming {
                    stage,
                    runs: self.stage_runs[stage as usize].load(Ordering::Relaxed),
                    avg_time_ms: avg_time_ms(
                        &self.stage_time_us[stage as usize],
                        &self.stage_runs[stage as usize],
                    ),
                })
                .collect(),
            item_failures: self.item_failures.load(Ordering::Relaxed),
            claims_extracted: self.claims_extracted.load(Ordering::Relaxed),
            questions_produced: self.questions_produced.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub runs: usize,
    pub avg_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: usize,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub stages: Vec<StageTiming>,
    pub item_failures: usize,
    pub claims_extracted: usize,
    pub questions_produced: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_averages() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage(Stage::GapAnalysis, Duration::from_millis(10), 1);
        metrics.record_stage(Stage::GapAnalysis, Duration::from_millis(30), 2);

        let snapshot = metrics.snapshot();
        let gaps = &snapshot.stages[Stage::GapAnalysis as usize];
        assert_eq!(gaps.stage, Stage::GapAnalysis);
        assert_eq!(gaps.runs, 2);
        assert!((gaps.avg_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.stages[Stage::Grounding as usize].avg_time_ms, 0.0);
        assert_eq!(snapshot.item_failures, 3);
    }

    #[test]
    fn test_run_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_run_started();
        metrics.record_run_started();
        metrics.record_run(true);
        metrics.record_run(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_started, 2);
        assert_eq!(snapshot.runs_completed, 1);
        assert_eq!(snapshot.runs_failed, 1);
    }
}
