//! Server-rendered views. The `data-testid` attributes are what browser
//! tests locate elements by, so they must stay stable.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Html,
};
use maud::{DOCTYPE, Markup, html};

use crate::auth::authenticate;
use crate::chart::{Document, MountError, render_tally_chart};
use crate::error::{AppError, Result};
use crate::models::{StatementId, Tally};
use crate::routes::AppState;

fn page(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { (title) }
            }
            body {
                (content)
            }
        }
    }
}

/// Mounts a fresh chart for `tally` and returns its mount point element.
pub fn tally_chart(statement: StatementId, tally: Tally) -> Result<Markup> {
    let target = format!("tally-{statement}");
    let mut doc = Document::new();
    doc.mount(target.as_str());
    render_tally_chart(&mut doc, &target, tally.agree, tally.skip, tally.disagree)?;
    Ok(doc.markup(&target).ok_or(MountError::Missing(target))?)
}

pub async fn statement_page(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
) -> Result<Html<String>, AppError> {
    let statement = state.store.get_statement(id).await?;
    let tally = state.store.get_tally(id).await?;
    let chart = tally_chart(id, tally)?;

    let content = html! {
        div data-testid="current-statement" {
            div data-testid="statement-text" { (statement.text) }
            (chart)
        }
    };
    Ok(Html(page("Statement", content).into_string()))
}

pub async fn statement_chart(
    State(state): State<AppState>,
    Path(id): Path<StatementId>,
) -> Result<Html<String>, AppError> {
    let tally = state.store.get_tally(id).await?;
    Ok(Html(tally_chart(id, tally)?.into_string()))
}

pub async fn subscriptions_page(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    let subscriptions = state.store.subscriptions(&voter).await?;

    let content = html! {
        h1 { "My Subscriptions" }
        @if subscriptions.is_empty() {
            p { "You have not subscribed to any statements yet" }
        }
        @for (i, statement) in subscriptions.iter().enumerate() {
            div data-testid={ "subscription-statement-" (i) } {
                a href={ "/statement/" (statement.id) } { (statement.text) }
            }
        }
    };
    Ok(Html(page("Subscriptions", content).into_string()))
}

pub async fn history_page(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    let history = state.store.vote_history(&voter).await?;

    let content = html! {
        h1 { "My Votes" }
        @if history.is_empty() {
            p { "You have not voted on any statements yet" }
        }
        @for (i, entry) in history.iter().enumerate() {
            div data-testid={ "history-entry-" (i) } data-choice=(entry.choice) {
                a href={ "/statement/" (entry.statement_id) } { (entry.statement_text) }
                " "
                time datetime=(entry.voted_at.to_rfc3339()) {
                    (entry.voted_at.format("%Y-%m-%d %H:%M"))
                }
            }
        }
    };
    Ok(Html(page("History", content).into_string()))
}

pub async fn submissions_page(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let voter = authenticate(&state, &headers).await?;
    let submissions = state.store.submissions(&voter).await?;

    let mut entries = Vec::with_capacity(submissions.len());
    for submission in &submissions {
        let chart = tally_chart(submission.statement.id, submission.tally)?;
        entries.push((submission, chart));
    }

    let content = html! {
        h1 { "My Statements" }
        @if entries.is_empty() {
            p { "You have not submitted any statements yet" }
        }
        @for (i, (submission, chart)) in entries.iter().enumerate() {
            div data-testid={ "submission-statement-" (i) } {
                a href={ "/statement/" (submission.statement.id) } { (submission.statement.text) }
                @if let Some(choice) = submission.own_choice {
                    span data-testid="own-vote" { " (you: " (choice) ")" }
                }
                (chart)
            }
        }
    };
    Ok(Html(page("Submissions", content).into_string()))
}
