use std::io::{self, Write};

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use commitments_core::api::CommitmentQuery;
use commitments_core::auth::{Credentials, SignUpData};
use commitments_core::guard::{self, Access};
use commitments_core::models::ReportRequest;
use commitments_core::{ApiClient, Config, SessionManager, SessionState};

/// Widest a title column gets before it is cut
const TITLE_WIDTH: usize = 40;

pub struct Context<'a> {
    pub session: &'a SessionManager,
    pub api: &'a ApiClient,
    pub json: bool,
}

impl Context<'_> {
    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Resource commands behave like a protected page: verify the session first
async fn require_session(ctx: &Context<'_>) -> Result<()> {
    match guard::require_session(ctx.session).await {
        Access::Granted => Ok(()),
        Access::Redirect(_) => bail!("Not signed in. Run `commitments signin` first."),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub async fn sign_in(ctx: &Context<'_>, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    ctx.session
        .sign_in(&Credentials::new(email.clone(), password))
        .await?;

    config.last_email = Some(email.clone());
    config.save()?;
    println!("Signed in as {}", email);
    Ok(())
}

pub async fn sign_up(
    ctx: &Context<'_>,
    first_name: String,
    last_name: String,
    email: String,
) -> Result<()> {
    let password = rpassword::prompt_password("Choose a password: ")
        .context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Repeat the password: ")
        .context("Failed to read password")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let data = SignUpData {
        first_name,
        last_name,
        email: email.clone(),
        password,
    };
    ctx.session.sign_up(&data).await?;
    println!("Account created for {}. Check your inbox, then run `commitments signin`.", email);
    Ok(())
}

pub async fn sign_out(ctx: &Context<'_>) -> Result<()> {
    ctx.session.sign_out().await?;
    println!("Signed out");
    Ok(())
}

pub async fn status(ctx: &Context<'_>, check: bool) -> Result<()> {
    let state = if check {
        if ctx.session.is_authenticated().await {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    } else {
        ctx.session.state()
    };

    match state {
        SessionState::Authenticated if check => println!("Signed in (verified with server)"),
        SessionState::Authenticated => println!("Signed in"),
        SessionState::Refreshing => println!("Signed in, refreshing tokens"),
        SessionState::Unauthenticated => println!("Not signed in"),
    }
    Ok(())
}

pub async fn refresh(ctx: &Context<'_>) -> Result<()> {
    ctx.session.refresh_tokens().await?;
    println!("Tokens refreshed");
    Ok(())
}

pub async fn me(ctx: &Context<'_>) -> Result<()> {
    require_session(ctx).await?;
    let user = ctx.api.me().await?;
    if ctx.json {
        return ctx.print_json(&user);
    }

    println!("{} <{}>", user.full_name(), user.email);
    if ctx.api.is_admin().await? {
        println!("Role: administrator");
    }
    Ok(())
}

pub async fn commitments(
    ctx: &Context<'_>,
    page: u32,
    size: u32,
    user: Option<String>,
    status: Option<String>,
    category: Option<String>,
) -> Result<()> {
    require_session(ctx).await?;
    let query = CommitmentQuery {
        page,
        size,
        user_id: user,
        status_id: status,
        category_id: category,
    };
    let result = ctx.api.list_commitments(&query).await?;
    if ctx.json {
        return ctx.print_json(&result);
    }

    if result.content.is_empty() {
        println!("No commitments");
        return Ok(());
    }
    println!(
        "{:<38} {:<40} {:<14} {:<16} {}",
        "ID", "TITLE", "STATUS", "CATEGORY", "DUE"
    );
    for c in &result.content {
        println!(
            "{:<38} {:<40} {:<14} {:<16} {}",
            c.id.as_deref().unwrap_or("-"),
            truncate(&c.title, TITLE_WIDTH),
            c.status_display(),
            c.category_display(),
            c.due_date.as_deref().map(format_date).unwrap_or_default(),
        );
    }
    println!("{} ({} total)", result.position_display(), result.total_elements);
    Ok(())
}

pub async fn tasks(ctx: &Context<'_>, commitment: &str) -> Result<()> {
    require_session(ctx).await?;
    let tasks = ctx.api.list_tasks(commitment).await?;
    if ctx.json {
        return ctx.print_json(&tasks);
    }

    if tasks.is_empty() {
        println!("No tasks");
    }
    for task in &tasks {
        let status = task.status.as_ref().map(|s| s.name.as_str()).unwrap_or("-");
        println!("[{}] {}", status, truncate(&task.title, TITLE_WIDTH));
    }
    Ok(())
}

pub async fn statuses(ctx: &Context<'_>) -> Result<()> {
    require_session(ctx).await?;
    let statuses = ctx.api.list_statuses().await?;
    if ctx.json {
        return ctx.print_json(&statuses);
    }
    for s in &statuses {
        println!("{:<20} {}", s.name, s.description);
    }
    Ok(())
}

pub async fn categories(ctx: &Context<'_>) -> Result<()> {
    require_session(ctx).await?;
    let categories = ctx.api.list_categories().await?;
    if ctx.json {
        return ctx.print_json(&categories);
    }
    for c in &categories {
        println!("{:<20} {}", c.name, c.description);
    }
    Ok(())
}

pub async fn report(ctx: &Context<'_>, user: Option<String>, from: &str, to: &str) -> Result<()> {
    require_session(ctx).await?;
    let (start_date, end_date) = report_window(from, to)?;
    let user_id = match user {
        Some(id) => id,
        None => ctx
            .api
            .me()
            .await?
            .id
            .ok_or_else(|| anyhow!("Signed-in user has no id"))?,
    };

    let report = ctx
        .api
        .create_report(&ReportRequest {
            user_id,
            start_date,
            end_date,
        })
        .await?;
    if ctx.json {
        return ctx.print_json(&report);
    }

    println!("{}", report.summary());
    for c in &report.completed_commitments {
        println!("  commitment  {}", truncate(&c.title, TITLE_WIDTH));
    }
    for t in &report.completed_tasks {
        println!("  task        {}", truncate(&t.title, TITLE_WIDTH));
    }
    Ok(())
}

/// Whole days from the start of `from` to the end of `to`, in UTC
fn report_window(from: &str, to: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
    };
    let start = parse(from)?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("Invalid start date"))?
        .and_utc();
    let end = parse(to)?
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| anyhow!("Invalid end date"))?
        .and_utc();
    if end < start {
        bail!("Report end date is before its start date");
    }
    Ok((start, end))
}

/// Truncate a string to a maximum length, adding ellipsis if needed
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Show the date part of an ISO timestamp
fn format_date(date: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        dt.format("%b %d, %Y").to_string()
    } else if date.len() >= 10 {
        date.chars().take(10).collect()
    } else {
        date.to_string()
    }
}
