mod artifacts;
mod attempt;
mod automation;
mod cli;
mod config;
mod error;
mod logging;
mod orchestrator;
mod render;
mod store;
mod transform;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;

use attempt::{AttemptRequest, Credentials, SessionKind};
use automation::{AutomationController, ControllerSettings, WebDriverLauncher};
use cli::{AttemptArgs, Cli, Command, RecordsQuery};
use config::AgentConfig;
use orchestrator::AttendanceOrchestrator;
use render::QrRenderer;
use transform::CodeTransformer;
use ui::AttemptProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.json_logs);

    let config = AgentConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let orchestrator = Arc::new(build_orchestrator(&config));

    match cli.command {
        Command::Convert(args) => submit(&orchestrator, SessionKind::Morning, args).await?,
        Command::Evening(args) => submit(&orchestrator, SessionKind::Evening, args).await?,
        Command::Mark {
            link,
            original,
            evening,
            module,
            username,
            password,
        } => {
            let kind = if evening {
                SessionKind::Evening
            } else {
                SessionKind::Morning
            };
            let request = AttemptRequest {
                link: original,
                module_name: module,
                credentials: Credentials::new(username, password),
            };
            let (pending, handle) = orchestrator.mark(kind, &request, &link)?;
            let progress = AttemptProgress::resume(&pending);
            let attempt = handle.await.context("attendance task panicked")?;
            progress.complete(&attempt);
            progress.print_audit(&attempt);
        }
        Command::Variants { link, count } => {
            for (i, variant) in orchestrator.variants(&link, count)?.iter().enumerate() {
                println!("{}. {variant}", i + 1);
            }
        }
        Command::Digit { link, digit } => {
            println!("{}", orchestrator.convert_to_digit(&link, digit)?);
        }
        Command::Render { payload, label } => {
            let path = orchestrator.render_only(&payload, label.as_deref())?;
            println!("{}", path.display());
        }
        Command::Records { query } => {
            let records = match query {
                RecordsQuery::Today => orchestrator.records_for_today().await?,
                RecordsQuery::Date { date } => orchestrator.records_for_date(&date).await?,
                RecordsQuery::Module { name } => orchestrator.records_for_module(&name).await?,
            };
            ui::print_records(&records);
        }
    }

    Ok(())
}

fn build_orchestrator(config: &AgentConfig) -> AttendanceOrchestrator {
    let launcher = Arc::new(WebDriverLauncher::new(&config.webdriver));
    let controller = AutomationController::new(launcher, ControllerSettings::from_config(config));

    AttendanceOrchestrator::new(
        CodeTransformer::new(&config.portal_url, config.evening_offset),
        Arc::new(QrRenderer::new(&config.qr_code_dir)),
        store::from_config(config),
        Arc::new(controller),
        Box::new(StdRng::from_os_rng()),
        &config.link_prefix,
    )
}

async fn submit(
    orchestrator: &Arc<AttendanceOrchestrator>,
    kind: SessionKind,
    args: AttemptArgs,
) -> Result<()> {
    let submission = orchestrator.submit(kind, &args.into_request())?;

    let progress = AttemptProgress::start(&submission.response);
    let attempt = submission
        .phase_two
        .await
        .context("attendance task panicked")?;
    progress.complete(&attempt);
    progress.print_audit(&attempt);

    Ok(())
}
