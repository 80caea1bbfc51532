mod config;
mod detector;
mod humanize;
mod notify;
mod probe;
mod runner;
mod state;

use clap::Parser;
use config::{ConfigLayer, TelegramLayer};
use detector::RestartDetector;
use notify::{Notifier, StdoutNotifier, TelegramNotifier};
use probe::{ProbeError, SystemctlProbe};
use runner::RunReport;
use state::StateStore;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_OK: u8 = 0;
/// Configuration problems (e.g. no unit given).
const EXIT_CONFIG: u8 = 2;
/// The unit's status could not be read.
const EXIT_PROBE: u8 = 1;

/// Check once whether a systemd unit restarted since the previous run and
/// alert through Telegram, with a cooldown between alerts. Meant to be
/// invoked periodically by cron or a systemd timer.
#[derive(Parser, Debug)]
#[command(name = "unit-watch", version, about)]
struct Cli {
    /// systemd unit name (e.g. nginx.service)
    #[arg(short, long, env = "UNIT")]
    unit: Option<String>,

    /// Path to the state file (default: /var/tmp/unit-watch/<unit>.json)
    #[arg(short, long, env = "STATE")]
    state: Option<PathBuf>,

    /// Timeout for the systemctl command (e.g. 5s)
    #[arg(long, env = "TIMEOUT")]
    timeout: Option<String>,

    /// Minimum time between alerts (e.g. 10m)
    #[arg(long, env = "COOLDOWN")]
    cooldown: Option<String>,

    /// Do not send Telegram messages, only print them
    #[arg(long, env = "DRY_RUN", value_parser = clap::builder::FalseyValueParser::new())]
    dry_run: bool,

    /// Timeout for the Telegram API request (e.g. 10s)
    #[arg(long, env = "NOTIFY_TIMEOUT")]
    notify_timeout: Option<String>,

    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Telegram chat id
    #[arg(long, env = "CHAT_ID")]
    chat_id: Option<String>,

    /// Telegram API base URL
    #[arg(long, env = "TELEGRAM_BASE_URL")]
    telegram_base_url: Option<String>,

    /// TOML config file; flags and env vars override its values
    #[arg(short, long, env = "UNIT_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    show_config: bool,

    /// Extra logging (probe output, state writes)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Settings given on the command line or through the environment.
    fn overrides(&self) -> ConfigLayer {
        ConfigLayer {
            unit: self.unit.clone(),
            state: self.state.clone(),
            timeout: self.timeout.clone(),
            cooldown: self.cooldown.clone(),
            dry_run: self.dry_run.then_some(true),
            notify_timeout: self.notify_timeout.clone(),
            telegram: TelegramLayer {
                base_url: self.telegram_base_url.clone(),
                bot_token: self.bot_token.clone(),
                chat_id: self.chat_id.clone(),
            },
        }
    }
}

/// Exit status of a completed watch pass. Alerting and state-save
/// failures never change it; only a failed status read does.
fn exit_code(result: &Result<RunReport, ProbeError>) -> u8 {
    match result {
        Ok(_) => EXIT_OK,
        Err(_) => EXIT_PROBE,
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "unit_watch=debug"
    } else {
        "unit_watch=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match config::load(cli.config.as_deref(), cli.overrides()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if cli.show_config {
        return match config.to_pretty_json() {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to render configuration");
                ExitCode::FAILURE
            }
        };
    }

    let unit = match config.require_unit() {
        Ok(unit) => unit.to_string(),
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let detector = RestartDetector::new(unit, config.cooldown);
    let store = StateStore::new(config.state.clone());
    let probe = SystemctlProbe::new(config.timeout);
    let notifier: Box<dyn Notifier> = if config.dry_run {
        Box::new(StdoutNotifier)
    } else {
        Box::new(TelegramNotifier::new(
            config.telegram.clone(),
            config.notify_timeout,
        ))
    };

    let result = runner::run(
        &detector,
        &store,
        &probe,
        notifier.as_ref(),
        chrono::Utc::now(),
    )
    .await;
    match &result {
        Ok(report) => {
            tracing::debug!(
                verdict = ?report.verdict,
                alerted = report.alerted,
                delivered = report.delivered,
                last_uptime_ms = report.new_state.last_uptime_ms,
                state_saved = report.state_saved,
                "run complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, unit = detector.unit(), "failed to read unit status");
        }
    }
    ExitCode::from(exit_code(&result))
}
