use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use nitros_pubsub::{Subscriber, SubscriberOptions};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::cmd::{registry, shutdown_token, Context, HzArgs};
use crate::exit::{pubsub_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

const REPORT_PERIOD: Duration = Duration::from_secs(1);

/// Arrival times of the last `capacity` messages.
#[derive(Debug)]
struct CountWindow {
    capacity: usize,
    arrivals: VecDeque<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RateReport {
    rate_hz: f64,
    messages: usize,
    span_s: f64,
}

impl CountWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            arrivals: VecDeque::with_capacity(capacity),
        }
    }

    fn record(&mut self, at: Instant) {
        if self.arrivals.len() == self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);
    }

    fn report(&self) -> Option<RateReport> {
        let (first, last) = (self.arrivals.front()?, self.arrivals.back()?);
        let span = last.duration_since(*first).as_secs_f64();
        if self.arrivals.len() < 2 || span <= 0.0 {
            return None;
        }
        Some(RateReport {
            rate_hz: (self.arrivals.len() - 1) as f64 / span,
            messages: self.arrivals.len(),
            span_s: span,
        })
    }
}

pub async fn run(args: HzArgs, ctx: Context) -> CliResult<i32> {
    let registry = registry()?;
    let shutdown = shutdown_token()?;

    let window = Arc::new(Mutex::new(CountWindow::new(args.window as usize)));
    let recorder = Arc::clone(&window);
    let options = SubscriberOptions::default().with_log(ctx.events);
    let subscriber = Subscriber::new(
        &registry,
        &args.topic,
        move |_msg| {
            recorder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(Instant::now());
        },
        options,
    )
    .map_err(|err| pubsub_error("subscribe failed", err))?;
    info!(topic = %args.topic, window = args.window, "measuring rate (Ctrl+C to stop)");

    let deadline = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let start = tokio::time::Instant::now() + REPORT_PERIOD;
    let mut ticker = tokio::time::interval_at(start, REPORT_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = &mut deadline => break,
            _ = ticker.tick() => {
                let report = window.lock().unwrap_or_else(PoisonError::into_inner).report();
                print_report(&args.topic, report, ctx.format);
            }
        }
    }

    subscriber.close().await;
    Ok(SUCCESS)
}

fn print_report(topic: &str, report: Option<RateReport>, format: OutputFormat) {
    match (report, format) {
        (report, OutputFormat::Json) => print_json(&serde_json::json!({
            "topic": topic,
            "rate_hz": report.map(|r| r.rate_hz),
            "messages": report.map_or(0, |r| r.messages),
            "window_s": report.map(|r| r.span_s),
        })),
        (Some(r), _) => println!(
            "  average rate: {:.1} Hz ({} msgs in {:.2}s)",
            r.rate_hz, r.messages, r.span_s
        ),
        (None, _) => println!("  no messages yet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_over_count_window() {
        let start = Instant::now();
        let mut window = CountWindow::new(5);
        for i in 0..20 {
            window.record(start + Duration::from_millis(i * 50));
        }
        let report = window.report().unwrap();
        assert_eq!(report.messages, 5);
        assert!((report.rate_hz - 20.0).abs() < 1e-6);
    }

    #[test]
    fn needs_two_messages() {
        let mut window = CountWindow::new(10);
        assert!(window.report().is_none());
        window.record(Instant::now());
        assert!(window.report().is_none());
    }
}
