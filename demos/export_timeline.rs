//! Timeline export example.
//!
//! Logs in (resuming a stored session when possible), exports the timeline
//! of the last `TR_DAYS` days to `<TR_OUTPUT>/events.json` and downloads all
//! documents below `<TR_OUTPUT>/documents`.
//!
//! Environment:
//! - `TR_PHONE`, `TR_PIN`: credentials (otherwise read from
//!   `<TR_OUTPUT>/credentials`, phone on the first line and PIN on the second)
//! - `TR_MODE`: `web` (default) or `app`
//! - `TR_DAYS`: how far back to go, `0` for everything (default 0)
//! - `TR_OUTPUT`: output directory (default `traderepublic-export`)
//!
//! Run with: cargo run --example export_timeline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use traderepublic_rs::auth::{
    AuthStateKind, FileTokenStore, NegotiatorConfig, ResetConfirmation, SessionNegotiator,
};
use traderepublic_rs::{ClientConfig, Credentials, Error, LoginMode, Session, TradeRepublicClient};

type Prompt = Lines<BufReader<Stdin>>;

async fn ask(prompt: &mut Prompt, question: &str) -> traderepublic_rs::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;
    Ok(prompt.next_line().await?.unwrap_or_default().trim().to_string())
}

fn credentials(output: &Path) -> traderepublic_rs::Result<Credentials> {
    match (std::env::var("TR_PHONE"), std::env::var("TR_PIN")) {
        (Ok(phone), Ok(pin)) => Ok(Credentials::new(phone, pin)),
        _ => Credentials::from_lines(&std::fs::read_to_string(output.join("credentials"))?),
    }
}

async fn web_login(
    negotiator: &mut SessionNegotiator,
    prompt: &mut Prompt,
) -> traderepublic_rs::Result<Session> {
    if negotiator.resume_session().await? {
        if let Some(session) = negotiator.session() {
            println!("Resumed stored session.");
            return Ok(session.clone());
        }
    }

    let countdown = negotiator.begin_web_login().await?;
    println!("A code was sent to your app. Press enter without a code to get it by SMS (available in {countdown}s).");
    loop {
        let code = ask(prompt, "Code: ").await?;
        if code.is_empty() {
            if let Some(wait) = negotiator.sms_countdown_remaining() {
                println!("Requesting SMS in {}s...", wait.as_secs());
            }
            negotiator.resend_as_sms().await?;
            continue;
        }
        match negotiator.complete_web_login(&code).await {
            Ok(session) => return Ok(session),
            Err(Error::Authentication(message))
                if negotiator.state() != AuthStateKind::Unauthenticated =>
            {
                println!("Rejected: {message}");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn app_login(
    negotiator: &mut SessionNegotiator,
    prompt: &mut Prompt,
) -> traderepublic_rs::Result<Session> {
    match negotiator.login_app().await {
        Ok(session) => Ok(session),
        Err(Error::StaleCredential(reason)) => {
            println!("Device key unusable: {reason}");
            let answer = ask(
                prompt,
                "Reset the device? Your other devices will be logged out [y/N]: ",
            )
            .await?;
            let confirmation = if answer.eq_ignore_ascii_case("y") {
                ResetConfirmation::Confirmed
            } else {
                ResetConfirmation::Declined
            };
            negotiator.initiate_device_reset(confirmation).await?;
            let token = ask(prompt, "Token from SMS: ").await?;
            negotiator.complete_device_reset(&token).await
        }
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> traderepublic_rs::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let output = PathBuf::from(
        std::env::var("TR_OUTPUT").unwrap_or_else(|_| "traderepublic-export".to_string()),
    );
    let days: u32 = std::env::var("TR_DAYS")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    let mode = match std::env::var("TR_MODE").as_deref() {
        Ok("app") => LoginMode::App,
        _ => LoginMode::Web,
    };

    let config = ClientConfig::default();
    let negotiator_config = match mode {
        LoginMode::Web => NegotiatorConfig::web(),
        LoginMode::App => NegotiatorConfig::app(),
    };
    let mut negotiator = SessionNegotiator::new(
        credentials(&output)?,
        Arc::new(FileTokenStore::in_dir(&output)),
        negotiator_config,
        &config,
    )?;

    let mut prompt = BufReader::new(tokio::io::stdin()).lines();
    let session = match mode {
        LoginMode::Web => web_login(&mut negotiator, &mut prompt).await?,
        LoginMode::App => app_login(&mut negotiator, &mut prompt).await?,
    };
    println!("Logged in.");

    let client = TradeRepublicClient::with_session(session, config)?;
    let result = client
        .export()
        .since_days_ago(days)
        .documents_dir(output.join("documents"))
        .run()
        .await?;

    std::fs::create_dir_all(&output)?;
    let events_path = output.join("events.json");
    std::fs::write(&events_path, serde_json::to_vec_pretty(&result.events)?)?;
    println!("Wrote {} events to {}", result.events.len(), events_path.display());

    if let Some(report) = result.downloads {
        println!(
            "Downloaded {} documents ({} retries, {} failed)",
            report.completed,
            report.retried,
            report.failed()
        );
        for failure in &report.failures {
            println!("  {} <- {}: {}", failure.task.destination.display(), failure.task.url, failure.error);
        }
    }

    Ok(())
}
