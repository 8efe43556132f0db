use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::collector::{Progress, ResultCollector};
use crate::shutdown::StopSignal;

const TICK: Duration = Duration::from_secs(1);
const REPORT_EVERY: Duration = Duration::from_secs(5);

pub fn spawn(
    collector: Arc<ResultCollector>,
    stop: StopSignal,
    started: Instant,
    duration: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        progress_loop(collector, stop, started, duration).await;
    })
}

async fn progress_loop(
    collector: Arc<ResultCollector>,
    stop: StopSignal,
    started: Instant,
    duration: Duration,
) {
    log::info!("benchmark running for {}s", duration.as_secs());
    let mut last_report = Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = stop.wait() => break,
        }

        if last_report.elapsed() < REPORT_EVERY {
            continue;
        }
        let progress = collector.progress();
        log::info!("{}", progress_line(progress, started.elapsed(), duration));
        last_report = Instant::now();
    }
}

fn progress_line(progress: Progress, elapsed: Duration, duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let pct = if total > 0.0 {
        (elapsed.as_secs_f64() / total * 100.0).min(100.0)
    } else {
        100.0
    };
    let remaining = duration.saturating_sub(elapsed).as_secs_f64();
    format!(
        "progress {pct:.1}% | ok {} | failed {} | {remaining:.0}s left",
        progress.success_count, progress.error_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_is_capped_at_full() {
        let progress = Progress {
            success_count: 4,
            error_count: 1,
        };
        let line = progress_line(progress, Duration::from_secs(40), Duration::from_secs(30));
        assert_eq!(line, "progress 100.0% | ok 4 | failed 1 | 0s left");

        let line = progress_line(progress, Duration::from_secs(15), Duration::from_secs(30));
        assert_eq!(line, "progress 50.0% | ok 4 | failed 1 | 15s left");
    }

    #[tokio::test]
    async fn monitor_exits_on_stop() {
        let stop = StopSignal::new();
        let handle = spawn(
            Arc::new(ResultCollector::new()),
            stop.clone(),
            Instant::now(),
            Duration::from_secs(30),
        );
        stop.fire();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
