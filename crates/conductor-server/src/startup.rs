//! Server startup utilities.

use conductor_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
   ______                __           __
  / ____/___  ____  ____/ /_  _______/ /_____  _____
 / /   / __ \/ __ \/ __  / / / / ___/ __/ __ \/ ___/
/ /___/ /_/ / / / / /_/ / /_/ / /__/ /_/ /_/ / /
\____/\____/_/ /_/\__,_/\__,_/\___/\__/\____/_/

                 Job Orchestration
    "#);
}

/// Prints the settings that shape this node's behaviour.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Node:         {} ({})", config.worker.id, config.role);
    info!(
        "Queue:        {} / {} ({} partitions)",
        config.queue.task_topic, config.queue.result_topic, config.queue.partitions
    );
    if config.role.runs_worker() {
        info!(
            "Worker:       {} consumers, {}s job timeout",
            config.worker.concurrency, config.worker.job_timeout_secs
        );
    }
    if config.role.runs_orchestrator() {
        info!(
            "Scheduler:    every {}ms, batch {}",
            config.scheduler.interval_ms, config.scheduler.batch_size
        );
    }
    info!("{}", separator);
}
