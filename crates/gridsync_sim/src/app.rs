//! Main application logic and lifecycle management.
//!
//! The `Application` owns the loaded configuration, spawns the simulated
//! players on one in-memory broker, reports aggregate sync statistics while
//! they run, and tears every session down on shutdown.

use crate::{
    bot::{Bot, BotReport},
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    shutdown::ShutdownState,
    signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent},
};
use gridsync::{AggregateStats, MemoryBroker, SessionHandle};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything the run produced, returned once every player has stopped.
#[derive(Debug)]
pub struct SimulationSummary {
    pub aggregate: AggregateStats,
    pub reports: Vec<BotReport>,
}

/// Main application struct.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);

        let app = Self::from_config(config)?;
        display_banner();
        Ok(app)
    }

    /// Wraps an already loaded configuration after validating it.
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs until the configured duration elapses or a termination signal
    /// arrives. A duration of 0 waits for the signal only.
    pub async fn run(self) -> Result<SimulationSummary, Box<dyn std::error::Error>> {
        let duration = self.config.simulation.duration_secs;

        // A second signal while shutting down exits immediately
        let stop = async move {
            if duration == 0 {
                info!("🛑 Press Ctrl+C to stop the simulation");
                if let Err(e) = wait_for_shutdown_signal().await {
                    error!("Failed to wait for shutdown signal: {e}");
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(duration)) => {
                        info!("⏰ Simulation ran for {}s", duration);
                    }
                    result = wait_for_shutdown_signal() => {
                        if let Err(e) = result {
                            error!("Failed to wait for shutdown signal: {e}");
                        }
                    }
                }
            }

            tokio::spawn(async {
                if wait_for_shutdown_signal_silent().await.is_ok() {
                    warn!("Shutdown signal received again, exiting immediately");
                    std::process::exit(1);
                }
            });
        };

        self.run_until(stop).await
    }

    /// Runs the simulation until `stop` resolves.
    pub async fn run_until<F>(self, stop: F) -> Result<SimulationSummary, Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        let sim = &self.config.simulation;
        self.log_configuration_summary();

        let broker = MemoryBroker::new();
        let mut bots = Vec::with_capacity(sim.bots);
        for index in 0..sim.bots {
            match Bot::spawn(&broker, self.config.sync.clone(), sim.clone(), index).await {
                Ok(bot) => bots.push(bot),
                Err(e) => error!("❌ Player {index} failed to connect: {e}"),
            }
        }
        if bots.is_empty() {
            return Err("no simulated player could connect".into());
        }
        info!("👥 {} of {} players connected", bots.len(), sim.bots);

        if let Err(e) = bots[0].open_round(bots.len()).await {
            warn!("First round could not be opened: {e}");
        }

        let handles: Vec<SessionHandle> = bots.iter().map(|b| b.handle().clone()).collect();
        let shutdown = ShutdownState::new();
        let players: Vec<JoinHandle<BotReport>> = bots
            .into_iter()
            .map(|bot| tokio::spawn(bot.run(shutdown.clone())))
            .collect();

        let monitoring = {
            let handles = handles.clone();
            let period = Duration::from_secs(sim.stats_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                let mut last_published = 0u64;
                loop {
                    interval.tick().await;
                    let stats = collect_stats(&handles).await;
                    let published = stats.totals.total_published();
                    info!(
                        "📊 {} sessions | {} members | {} published (+{}) | {} routed | {} malformed | {} cell moves",
                        stats.sessions,
                        stats.totals.member_count,
                        published,
                        published.saturating_sub(last_published),
                        stats.totals.deliveries_routed,
                        stats.totals.malformed_dropped,
                        stats.totals.cell_transitions,
                    );
                    last_published = published;
                }
            })
        };

        info!("✅ Simulation is running");
        stop.await;

        info!("🛑 Stopping simulation...");
        monitoring.abort();
        shutdown.initiate_shutdown();

        let mut reports = Vec::with_capacity(players.len());
        for player in players {
            match player.await {
                Ok(report) => reports.push(report),
                Err(e) => error!("❌ Player task failed: {e}"),
            }
        }
        info!("Every session disconnected");

        let mut aggregate = AggregateStats::default();
        for report in &reports {
            aggregate.add(&report.stats);
        }
        log_final_statistics(&aggregate, &reports);

        Ok(SimulationSummary { aggregate, reports })
    }

    fn log_configuration_summary(&self) {
        let sim = &self.config.simulation;
        info!("📋 Configuration Summary:");
        info!("  👥 Players: {}", sim.bots);
        info!("  🌍 World: {:.0}x{:.0} units", sim.world_width, sim.world_height);
        info!(
            "  🔲 Cell size: {:.0} | broadcast every {}ms",
            self.config.sync.cell_size, self.config.sync.broadcast_interval_ms
        );
        info!(
            "  🏆 Rounds: {}s with {}s intermission",
            sim.round_secs, sim.intermission_secs
        );
        if sim.duration_secs == 0 {
            info!("  ⏱️ Duration: until interrupted");
        } else {
            info!("  ⏱️ Duration: {}s", sim.duration_secs);
        }
    }
}

/// Sums the stats of every still-open session.
async fn collect_stats(handles: &[SessionHandle]) -> AggregateStats {
    let mut aggregate = AggregateStats::default();
    for handle in handles {
        if let Ok(stats) = handle.stats().await {
            aggregate.add(&stats);
        }
    }
    aggregate
}

fn log_final_statistics(aggregate: &AggregateStats, reports: &[BotReport]) {
    info!("📊 Final Statistics:");
    info!("  - Sessions: {}", aggregate.sessions);
    info!("  - Positions published: {}", aggregate.totals.positions_published);
    info!("  - Global events published: {}", aggregate.totals.global_events_published);
    info!("  - Deliveries routed: {}", aggregate.totals.deliveries_routed);
    info!("  - Malformed dropped: {}", aggregate.totals.malformed_dropped);
    info!(
        "  - Subscribe / unsubscribe failures: {} / {}",
        aggregate.totals.subscribe_failures, aggregate.totals.unsubscribe_failures
    );
    info!("  - Cell transitions: {}", aggregate.totals.cell_transitions);

    let coins: u32 = reports.iter().map(|r| r.coins_collected).sum();
    let hits: u32 = reports.iter().map(|r| r.hits_landed).sum();
    info!("  - Coins collected: {coins} | Hits landed: {hits}");
    if let Some(best) = reports.iter().max_by_key(|r| r.rounds_won) {
        if best.rounds_won > 0 {
            info!("  - Most rounds won: {} ({})", best.id, best.rounds_won);
        }
    }
}
