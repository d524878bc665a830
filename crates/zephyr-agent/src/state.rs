use std::sync::{Arc, atomic::AtomicBool};

use tokio::sync::Mutex;

use crate::{
    config::ConfigStore,
    gate::{self, ReputationGate},
    history::OutputHistory,
    hub::ConnectionHub,
    parser::EventParser,
    players::{GatePolicy, PlayerTracker},
    roster::Roster,
    supervisor::{Supervisor, SupervisorOptions},
};

/// One instance of every component, shared by the transport handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ConfigStore>,
    pub supervisor: Supervisor,
    pub hub: ConnectionHub,
    pub history: Arc<Mutex<OutputHistory>>,
    pub roster: Arc<Roster>,
    pub enforce: Arc<AtomicBool>,
    pub replay_lines: usize,
}

impl AppContext {
    pub fn from_config(config: Arc<ConfigStore>) -> anyhow::Result<Self> {
        let cfg = config.snapshot();
        let gate = gate::from_endpoint(&cfg.uniteban_url, crate::support::gate_timeout())?;
        if gate.is_none() {
            tracing::info!("reputation gate disabled");
        }
        Self::with_gate(config, gate)
    }

    pub fn with_gate(
        config: Arc<ConfigStore>,
        gate: Option<Arc<dyn ReputationGate>>,
    ) -> anyhow::Result<Self> {
        let cfg = config.snapshot();
        let parser = EventParser::new(&cfg.player_patterns)?;
        let hub = ConnectionHub::new();
        let roster = Arc::new(Roster::default());
        let history = Arc::new(Mutex::new(OutputHistory::default()));
        let enforce = Arc::new(AtomicBool::new(cfg.uniteban));

        let policy = GatePolicy {
            gate,
            enforce: enforce.clone(),
            timeout: crate::support::gate_timeout(),
        };
        let tracker = Arc::new(PlayerTracker::new(
            parser,
            roster.clone(),
            hub.clone(),
            policy,
        ));
        let supervisor = Supervisor::new(
            SupervisorOptions::from_env(cfg.wrapper_path()),
            tracker,
            history.clone(),
            hub.clone(),
        );

        Ok(Self {
            config,
            supervisor,
            hub,
            history,
            roster,
            enforce,
            replay_lines: crate::support::history_replay_lines(),
        })
    }
}
