use race_tunnel_core::prelude::DelegatedShutdownListener;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Share of the machine's CPU above which the harness itself is considered overloaded.
const HIGH_CPU_PERCENT: f32 = 10.0;

/// Monitor the CPU usage of the harness process and warn when it is high.
///
/// This won't stop the run. An overloaded load generator falls behind its arrival schedule, so
/// the warning tells the user that measured rates and latencies may be distorted.
///
/// The CPU usage is sampled every [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL].
pub(crate) fn start_monitor(shutdown_listener: DelegatedShutdownListener) {
    let spawned = std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();

            let cpu_count = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);

            loop {
                if shutdown_listener.should_shutdown() {
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                let Some(process) = sys.process(this_process_pid) else {
                    log::debug!("Could not read CPU usage for this process, stopping monitor");
                    break;
                };

                let usage = process.cpu_usage() / cpu_count as f32;
                if usage > HIGH_CPU_PERCENT {
                    log::warn!(
                        "High CPU usage detected. The harness is using {:.2}% of the CPU, with {} available cores. Dispatch may lag the target rate.",
                        usage,
                        cpu_count
                    );
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start monitor thread: {e}");
    }
}
