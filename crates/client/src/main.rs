mod models;

use axum::{Router, extract::Query, response::Html, routing::get};
use colored::*;
use models::*;
use reqwest::RequestBuilder;
use std::env;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
const CALLBACK_PORT: u16 = 8080;
const VOTER_HEADER: &str = "X-Voter-Id";
const BAR_WIDTH: usize = 30;

// ===== Main =====

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let backend_url = env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());

    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}", "    🗳  STATEMENT VOTING".bright_yellow().bold());
    println!("{}", "=".repeat(60).bright_cyan());
    println!();

    let credentials = match (env::var("SUPABASE_URL"), env::var("VOTER_ID")) {
        (Ok(supabase_url), _) => match authenticate(supabase_url).await {
            Ok(token) => Credentials::Bearer(token),
            Err(e) => {
                eprintln!("{} {}", "❌ Authentication failed:".red().bold(), e);
                return Ok(());
            }
        },
        (Err(_), Ok(voter)) => Credentials::Voter(voter),
        (Err(_), Err(_)) => {
            anyhow::bail!("set SUPABASE_URL to log in, or VOTER_ID for a development backend")
        }
    };

    println!("{}", "✅ Authenticated!".green().bold());
    println!();

    let api = Api::new(backend_url, credentials);
    voting_loop(&api).await?;

    Ok(())
}

// ===== Authentication =====

enum Credentials {
    Bearer(String),
    Voter(String),
}

impl Credentials {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::Bearer(token) => request.header("Authorization", format!("Bearer {}", token)),
            Credentials::Voter(voter) => request.header(VOTER_HEADER, voter),
        }
    }
}

async fn authenticate(supabase_url: String) -> anyhow::Result<String> {
    // Token storage shared between the callback server and this task
    let token_store: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let token_store_clone = token_store.clone();

    let app = Router::new().route(
        "/callback",
        get(move |query: Query<CallbackParams>| callback_handler(query, token_store_clone.clone())),
    );

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", CALLBACK_PORT)).await?;
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    let auth_url = format!(
        "{}/auth/v1/authorize?provider=discord&redirect_to=http://localhost:{}/callback",
        supabase_url, CALLBACK_PORT
    );

    println!("{}", "Opening browser for login...".yellow());
    if let Err(e) = webbrowser::open(&auth_url) {
        eprintln!("{} {}", "⚠️  Could not open browser automatically:".yellow(), e);
        println!("{}", "Please open this URL manually:".bright_white().bold());
        println!("{}", auth_url.bright_blue().underline());
    }

    let timeout = tokio::time::Duration::from_secs(120);
    let start = tokio::time::Instant::now();

    loop {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        let token = token_store.lock().ok().and_then(|store| store.clone());
        if let Some(token) = token {
            server_handle.abort();
            return Ok(token);
        }

        if start.elapsed() > timeout {
            server_handle.abort();
            anyhow::bail!("Authentication timeout (2 minutes)");
        }
    }
}

async fn callback_handler(
    Query(params): Query<CallbackParams>,
    token_store: Arc<Mutex<Option<String>>>,
) -> Html<String> {
    if let Some(error) = params.error {
        return Html(format!(
            "<!DOCTYPE html><html><body><h1>❌ Authentication Failed</h1><p>{}</p>\
             <p>You can close this window and try again.</p></body></html>",
            error
        ));
    }

    if let Some(token) = params.access_token {
        if let Ok(mut store) = token_store.lock() {
            *store = Some(token);
        }
        return Html("<!DOCTYPE html><html><body><h1>✅ Logged in</h1>\
             <p>You can close this window.</p></body></html>"
            .to_string());
    }

    // The provider puts the token in the URL fragment, which never reaches
    // the server; bounce it back as a query parameter.
    Html(
        r#"<!DOCTYPE html><html><body><p>Finishing login...</p><script>
            const params = new URLSearchParams(window.location.hash.substring(1));
            const token = params.get('access_token');
            if (token) {
                window.location.replace('/callback?access_token=' + encodeURIComponent(token));
            } else {
                document.body.innerHTML = '<h1>❌ No token found</h1><p>Please try logging in again.</p>';
            }
        </script></body></html>"#
            .to_string(),
    )
}

// ===== Voting Loop =====

async fn voting_loop(api: &Api) -> anyhow::Result<()> {
    loop {
        let response = api.next_statement().await?;

        let Some(statement) = response.statement else {
            println!();
            println!("{}", "🎉 You've voted on every statement!".green().bold());
            println!("[N]ew statement  [L]ist subscriptions  [R]esults  [Q]uit");
            match prompt()?.as_str() {
                "n" | "new" => new_statement(api).await?,
                "l" | "list" => show_subscriptions(api).await?,
                "r" | "results" => show_results(api).await?,
                _ => return Ok(()),
            }
            continue;
        };

        println!("{}", "━".repeat(60).bright_black());
        println!(
            "{} {}/{}",
            "Progress:".bright_black(),
            response.seen.to_string().bright_cyan(),
            response.total.to_string().bright_cyan()
        );
        println!();
        println!("{}", "STATEMENT:".bright_yellow().bold());
        println!("{}", statement.text.bright_white().bold());
        println!();
        println!(
            "{}",
            "Vote: [A]gree  [S]kip  [D]isagree  [N]ew  [L]ist  [R]esults  [Q]uit".bright_black()
        );

        let choice = match prompt()?.as_str() {
            "a" | "agree" => "agree",
            "s" | "skip" => "skip",
            "d" | "disagree" => "disagree",
            "n" | "new" => {
                new_statement(api).await?;
                continue;
            }
            "l" | "list" => {
                show_subscriptions(api).await?;
                continue;
            }
            "r" | "results" => {
                show_results(api).await?;
                continue;
            }
            "q" | "quit" => {
                println!();
                println!("{}", "Thanks for voting! 👋".bright_cyan().bold());
                return Ok(());
            }
            _ => {
                println!("{}", "Invalid choice. Please try again.".red());
                continue;
            }
        };

        let tally = api.vote(statement.id, choice).await?;
        println!("{} {}", "✓ Voted".green(), choice.bold());
        println!("{}", tally_bars(&tally));
    }
}

fn prompt() -> anyhow::Result<String> {
    print!("{}", "> ".bright_green().bold());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase())
}

async fn new_statement(api: &Api) -> anyhow::Result<()> {
    println!("{}", "New statement (empty to cancel):".bright_yellow());
    print!("{}", "> ".bright_green().bold());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let text = input.trim();
    if text.is_empty() {
        return Ok(());
    }

    let statement = api.create_statement(text).await?;
    println!("{} #{}", "✓ Added statement".green(), statement.id);
    Ok(())
}

async fn show_subscriptions(api: &Api) -> anyhow::Result<()> {
    let subscriptions = api.subscriptions().await?;

    println!();
    println!("{}", "    📌 MY SUBSCRIPTIONS".bright_yellow().bold());
    if subscriptions.is_empty() {
        println!("You have not subscribed to any statements yet");
    }
    for statement in subscriptions {
        let tally = api.tally(statement.id).await?;
        println!("{}", statement.text.bright_white().bold());
        println!("{}", tally_bars(&tally));
    }
    println!();
    Ok(())
}

async fn show_results(api: &Api) -> anyhow::Result<()> {
    let stats = api.stats().await?;

    println!();
    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}", "    📊 VOTING RESULTS".bright_yellow().bold());
    println!("{}", "=".repeat(60).bright_cyan());
    println!();

    for (i, entry) in stats.iter().enumerate().take(10) {
        println!(
            "{}. #{} {} ({} votes)",
            (i + 1).to_string().bright_cyan(),
            entry.statement_id,
            entry.text.bright_white().bold(),
            entry.total.to_string().yellow(),
        );
        println!("{}", tally_bars(&entry.tally()));
    }

    println!();
    Ok(())
}

// ===== Tally Bars =====

/// Bar lengths in Agree / Skip / Disagree order, scaled to the largest count.
fn bar_lengths(tally: &Tally, width: usize) -> [usize; 3] {
    let counts = [tally.agree, tally.skip, tally.disagree];
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return [0; 3];
    }
    counts.map(|count| (count as usize * width) / max as usize)
}

fn tally_bars(tally: &Tally) -> String {
    let [agree, skip, disagree] = bar_lengths(tally, BAR_WIDTH);
    format!(
        "  {} {}\n  {} {}\n  {} {}",
        "█".repeat(agree).bright_green(),
        tally.agree,
        "█".repeat(skip).bright_black(),
        tally.skip,
        "█".repeat(disagree).red(),
        tally.disagree,
    )
}

// ===== API Calls =====

struct Api {
    base: String,
    client: reqwest::Client,
    credentials: Credentials,
}

impl Api {
    fn new(base: String, credentials: Credentials) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
            credentials,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = self.credentials.apply(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("API error ({}): {}", status, text);
        }

        Ok(response.json().await?)
    }

    async fn next_statement(&self) -> anyhow::Result<NextStatement> {
        self.send(self.client.get(format!("{}/api/statements/next", self.base)))
            .await
    }

    async fn vote(&self, statement_id: i64, choice: &str) -> anyhow::Result<Tally> {
        let request = self
            .client
            .post(format!("{}/api/statements/{}/vote", self.base, statement_id))
            .json(&VoteRequest { choice });
        self.send(request).await
    }

    async fn create_statement(&self, text: &str) -> anyhow::Result<Statement> {
        let request = self
            .client
            .post(format!("{}/api/statements", self.base))
            .json(&NewStatementRequest { text });
        self.send(request).await
    }

    async fn subscriptions(&self) -> anyhow::Result<Vec<Statement>> {
        self.send(self.client.get(format!("{}/api/subscriptions", self.base)))
            .await
    }

    async fn tally(&self, statement_id: i64) -> anyhow::Result<Tally> {
        self.send(
            self.client
                .get(format!("{}/api/statements/{}/tally", self.base, statement_id)),
        )
        .await
    }

    async fn stats(&self) -> anyhow::Result<Vec<StatementStats>> {
        self.send(self.client.get(format!("{}/admin/stats", self.base)))
            .await
    }
}
