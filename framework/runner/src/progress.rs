use std::cmp::min;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use race_tunnel_core::prelude::DelegatedShutdownListener;
use race_tunnel_instruments::Reporter;

use crate::counters::{DROPPED_ITERATIONS, ITERATIONS_COMPLETED};

/// Displays a progress bar while load is running to show the user how long is left, with a
/// running count of completed and dropped iterations.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    reporter: Arc<Reporter>,
    shutdown_listener: DelegatedShutdownListener,
) {
    let style = match ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    ) {
        Ok(style) => style,
        Err(e) => {
            log::warn!("Progress bar disabled, invalid template: {e}");
            return;
        }
    };

    let hours = planned_runtime.as_secs() / 3600;
    let minutes = (planned_runtime.as_secs() % 3600) / 60;
    let seconds = planned_runtime.as_secs() % 60;
    let style = style
        .with_key(
            "planned_runtime",
            move |_state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
            },
        )
        .progress_chars("#>-");

    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(style);

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let new = min(start_time.elapsed().as_secs(), planned_runtime.as_secs());
                pb.set_position(new);

                let snapshot = reporter.snapshot();
                pb.set_message(format!(
                    "{} done, {} dropped",
                    snapshot.counter(ITERATIONS_COMPLETED),
                    snapshot.counter(DROPPED_ITERATIONS)
                ));

                std::thread::sleep(Duration::from_secs(1));
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start progress thread: {e}");
    }
}
