use std::io::Read;

use staffetta_api_types::{
    BalanceView, JobPage, JobView, LedgerPage, RateLimitStatusView, SweepResponse,
};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;

use crate::args::{
    CreditsCommand, JobsCommand, JobsListArgs, RatelimitCommand, SubmitArgs, SweepArgs,
};
use crate::client::{ApiClient, ClientError};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read payload: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn jobs(client: &ApiClient, command: JobsCommand) -> Result<(), HandlerError> {
    match command {
        JobsCommand::List(args) => list_jobs(client, args).await,
        JobsCommand::Show { id } => {
            let job: JobView = client.get_api(&format!("/api/v1/renders/{id}"), &[]).await?;
            print_job(&job);
            Ok(())
        }
        JobsCommand::Retry { id } => {
            let job: JobView = client
                .post_ops(&format!("/ops/jobs/{id}/retry"), &serde_json::json!({}))
                .await?;
            println!("job {} resubmitted", job.id);
            print_job(&job);
            Ok(())
        }
        JobsCommand::Sync { id } => {
            let job: JobView = client
                .post_ops(&format!("/ops/jobs/{id}/sync"), &serde_json::json!({}))
                .await?;
            println!("job {} synced from provider", job.id);
            print_job(&job);
            Ok(())
        }
    }
}

async fn list_jobs(client: &ApiClient, args: JobsListArgs) -> Result<(), HandlerError> {
    let mut query: Vec<(&str, String)> = vec![("limit", args.limit.to_string())];
    if let Some(status) = args.status {
        query.push(("status", status));
    }
    if let Some(provider) = args.provider {
        query.push(("provider", provider));
    }
    if let Some(cursor) = args.cursor {
        query.push(("cursor", cursor));
    }

    let page: JobPage = client.get_api("/api/v1/renders", &query).await?;
    for job in &page.items {
        println!(
            "{}  {:<9}  {:<10}  cost={:<6}  {}",
            job.id,
            job.status,
            job.provider,
            job.cost,
            job.error_reason.as_deref().unwrap_or("-")
        );
    }
    if let Some(cursor) = page.next_cursor {
        println!("next cursor: {cursor}");
    }
    Ok(())
}

pub async fn submit(client: &ApiClient, args: SubmitArgs) -> Result<(), HandlerError> {
    let raw = match args.input_file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let input: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| HandlerError::InvalidInput(format!("payload is not valid JSON: {err}")))?;

    let body = serde_json::json!({
        "provider": args.provider,
        "input": input,
        "cost": args.cost,
    });

    let job: JobView = client.post_api("/api/v1/renders", &body).await?;
    println!("submitted job {}", job.id);
    print_job(&job);
    Ok(())
}

pub async fn credits(client: &ApiClient, command: CreditsCommand) -> Result<(), HandlerError> {
    match command {
        CreditsCommand::Show => {
            let balance: BalanceView = client.get_api("/api/v1/credits", &[]).await?;
            println!(
                "account {}: {} remaining of {} total",
                balance.account_id, balance.remaining, balance.total
            );
            Ok(())
        }
        CreditsCommand::Ledger { limit } => {
            let page: LedgerPage = client
                .get_api("/api/v1/credits/ledger", &[("limit", limit.to_string())])
                .await?;
            for entry in &page.items {
                let when = entry
                    .created_at
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| entry.created_at.to_string());
                println!(
                    "{when}  {:>8}  {:<24}  {}",
                    entry.delta,
                    entry.reason,
                    entry
                        .job_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        CreditsCommand::Grant {
            account_id,
            amount,
            reason,
        } => {
            let body = serde_json::json!({ "amount": amount, "reason": reason });
            let balance: BalanceView = client
                .post_ops(&format!("/ops/accounts/{account_id}/credits"), &body)
                .await?;
            println!(
                "granted {amount}; account {} now has {} remaining",
                balance.account_id, balance.remaining
            );
            Ok(())
        }
    }
}

pub async fn sweep(client: &ApiClient, args: SweepArgs) -> Result<(), HandlerError> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(minutes) = args.stale_after_minutes {
        query.push(("stale_after_minutes", minutes.to_string()));
    }

    let query_string = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let path = if query_string.is_empty() {
        "/ops/sweep".to_string()
    } else {
        format!("/ops/sweep?{query_string}")
    };

    let outcome: SweepResponse = client.post_ops(&path, &serde_json::json!({})).await?;
    println!("terminated {} stuck job(s)", outcome.fixed.len());
    for id in outcome.fixed {
        println!("  {id}");
    }
    Ok(())
}

pub async fn ratelimit(client: &ApiClient, command: RatelimitCommand) -> Result<(), HandlerError> {
    match command {
        RatelimitCommand::Status {
            action,
            identifier,
            tier,
        } => {
            let status: RateLimitStatusView = client
                .get_ops(
                    "/ops/rate-limit/status",
                    &[
                        ("action", action),
                        ("identifier", identifier),
                        ("tier", tier),
                    ],
                )
                .await?;
            println!(
                "{}/{} used, resets at unix {}",
                status.current_count, status.limit, status.reset_at
            );
            if let Some(blocked_until) = status.blocked_until {
                println!("blocked until unix {blocked_until}");
            }
            Ok(())
        }
        RatelimitCommand::Reset { action, identifier } => {
            let body = serde_json::json!({ "action": action, "identifier": identifier });
            client.post_ops_empty("/ops/rate-limit/reset", &body).await?;
            println!("rate limit window cleared");
            Ok(())
        }
    }
}

fn print_job(job: &JobView) {
    println!("  status:    {}", job.status);
    println!("  provider:  {}", job.provider);
    println!(
        "  render id: {}",
        job.provider_render_id.as_deref().unwrap_or("-")
    );
    println!("  cost:      {}", job.cost);
    if let Some(url) = job.output_url.as_deref() {
        println!("  output:    {url}");
    }
    if let Some(path) = job.stored_path.as_deref() {
        println!("  stored:    {path}");
    }
    if let Some(reason) = job.error_reason.as_deref() {
        println!("  error:     {reason}");
    }
}
