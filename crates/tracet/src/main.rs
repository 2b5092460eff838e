#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracet_core::decision::{ProposalDecision, TriggerAlert};
use tracet_core::errors::GatewayError;
use tracet_core::event::{Event, EventGroup};
use tracet_core::observation::Observation;
use tracet_core::traits::{AlertSink, ObservationGateway};

use tracet_engine::catalog;
use tracet_engine::config::EngineConfig;
use tracet_engine::dispatch::atca::AtcaDispatcher;
use tracet_engine::dispatch::mwa::MwaDispatcher;
use tracet_engine::dispatch::transport::ReqwestTransport;
use tracet_engine::dispatch::DispatchRegistry;
use tracet_engine::gateway::{ApiSession, ApiTransport};
use tracet_engine::policy::worth_observing;
use tracet_engine::skymap::pointings::spots_catalog;
use tracet_engine::skymap::{pointings_for, DefaultSkymapSource};
use tracet_engine::state::audit_log::verify_chain;
use tracet_engine::state::{Engine, LocalStore};

#[derive(Parser)]
#[command(
    name = "tracet",
    version,
    about = "Transient alert decisions and telescope triggering."
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the built-in proposal catalog as JSON.
    Proposals,

    /// Run proposal matching and policy on one event without side effects.
    Evaluate {
        /// Path to event .json.
        file: PathBuf,

        /// Only evaluate this proposal id.
        #[arg(long)]
        proposal: Option<String>,

        /// Evaluation time (RFC 3339), defaults to now.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Derive the four MWA pointings of a skymap (path or URL).
    Pointings {
        skymap: String,
    },

    /// Run the full decision cycle for one event.
    Process {
        /// Path to event .json.
        file: PathBuf,

        /// Directory holding the local state and audit log.
        #[arg(long)]
        state_dir: PathBuf,

        /// Engine config .json (environment overrides still apply).
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Verify the decision audit hash chain.
    VerifyLog {
        /// Path to the .audit.jsonl file.
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Proposals => cmd_proposals(),

        Cmd::Evaluate {
            file,
            proposal,
            now,
        } => cmd_evaluate(&file, proposal.as_deref(), now.unwrap_or_else(Utc::now)),

        Cmd::Pointings { skymap } => cmd_pointings(&skymap),

        Cmd::Process {
            file,
            state_dir,
            config,
        } => cmd_process(&file, &state_dir, config.as_deref()),

        Cmd::VerifyLog { file } => cmd_verify_log(&file),
    }
}

fn read_event(file: &Path) -> Result<Event> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{}: invalid event JSON", file.display()))
}

fn cmd_proposals() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&catalog::builtin())?);
    Ok(())
}

fn cmd_evaluate(file: &Path, only: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    let event = read_event(file)?;
    let proposals = catalog::builtin();
    let selected: Vec<_> = match only {
        Some(id) => vec![catalog::find(&proposals, id)?],
        None => proposals.iter().collect(),
    };

    let group = EventGroup::from_event(0, &event);
    let mut results = Vec::new();
    for proposal in selected {
        let decision = ProposalDecision::pending(0, proposal, &group, now);
        let outcome = worth_observing(&event, &group, proposal, &decision, now);
        results.push(json!({
            "proposal": proposal.proposal_id,
            "trigger": outcome.trigger,
            "debug": outcome.debug,
            "pending": outcome.pending,
            "log": outcome.log,
        }));
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn cmd_pointings(skymap: &str) -> Result<()> {
    let config = EngineConfig::load(None)?;
    let source = DefaultSkymapSource::new(config.http_timeout())?;
    let spots = spots_catalog(config.mwa_spots_file.as_deref())?;
    let pointings = pointings_for(&source, skymap, &spots)?;
    println!("{}", serde_json::to_string_pretty(&pointings)?);
    Ok(())
}

fn cmd_process(file: &Path, state_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let event = read_event(file)?;
    let config = EngineConfig::load(config_path)?;
    let proposals = catalog::with_secrets(
        catalog::builtin(),
        &config.project_passwords,
        config.atca_email.as_deref(),
    )?;

    let store = LocalStore::open(state_dir)?;
    let timeout = config.http_timeout();
    let registry = DispatchRegistry::new()
        .with(Box::new(MwaDispatcher::new(
            Box::new(ReqwestTransport::new(timeout)?),
            &config.mwa_trigger_url,
        )))
        .with(Box::new(AtcaDispatcher::new(
            Box::new(ReqwestTransport::new(timeout)?),
            config.atca.clone(),
        )));
    let skymaps = DefaultSkymapSource::new(timeout)?;
    let spots = spots_catalog(config.mwa_spots_file.as_deref())?;

    let remote = match config.web_app_url {
        Some(_) => Some(ApiSession::from_config(&config)?),
        None => None,
    };
    let mirrored;
    let (gateway, alerts): (&dyn ObservationGateway, &dyn AlertSink) = match &remote {
        Some(session) => {
            info!(state_dir = %state_dir.display(), "mirroring decisions to the web app");
            mirrored = Mirrored {
                local: &store,
                remote: session,
            };
            (&mirrored, &mirrored)
        }
        None => (&store, &store),
    };

    let engine = Engine {
        proposals: &proposals,
        store: &store,
        gateway,
        alerts,
        dispatchers: &registry,
        skymaps: &skymaps,
        spots: &spots,
    };
    let report = engine.process_event(&event, Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_verify_log(file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("no audit log found at {}", file.display());
    }
    let count = verify_chain(file)?;
    eprintln!("  audit chain valid ({count} entries)");
    Ok(())
}

/// Writes go to the local store first, then to the web app. Reads stay local.
struct Mirrored<'a, T: ApiTransport> {
    local: &'a LocalStore,
    remote: &'a ApiSession<T>,
}

impl<T: ApiTransport> Mirrored<'_, T> {
    fn forward(&self, what: &str, result: Result<(), GatewayError>) {
        if let Err(e) = result {
            warn!(error = %e, "web app {what} failed");
        }
    }
}

impl<T: ApiTransport> ObservationGateway for Mirrored<'_, T> {
    fn update_decision(&self, decision: &ProposalDecision) -> Result<(), GatewayError> {
        self.local.update_decision(decision)?;
        self.forward("decision update", self.remote.update_decision(decision));
        Ok(())
    }

    fn latest_observation(&self, telescope: &str) -> Result<Option<Observation>, GatewayError> {
        self.local.latest_observation(telescope)
    }

    fn create_observation(&self, observation: &Observation) -> Result<(), GatewayError> {
        self.local.create_observation(observation)?;
        self.forward("observation create", self.remote.create_observation(observation));
        Ok(())
    }

    fn update_event_group(&self, group: &EventGroup) -> Result<(), GatewayError> {
        self.local.update_event_group(group)?;
        self.forward("event group update", self.remote.update_event_group(group));
        Ok(())
    }
}

impl<T: ApiTransport> AlertSink for Mirrored<'_, T> {
    fn send_trigger_alert(&self, alert: &TriggerAlert) -> Result<(), GatewayError> {
        self.local.send_trigger_alert(alert)?;
        self.remote.send_trigger_alert(alert)
    }
}
