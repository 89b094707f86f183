mod script;

use std::io::BufRead;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use pn_core::Clock;
use pn_core::NavError;
use pn_core::NavResult;
use pn_core::SystemClock;
use pn_dom::Location;
use pn_history::SessionHistory;
use pn_net::Exchange;
use pn_net::FragmentRequest;
use pn_net::Http11Client;
use pn_net::ThreadedExchange;
use pn_session::ConfirmPrompt;
use pn_session::Session;
use pn_session::SessionConfig;
use pn_session::SessionEvent;
use script::Invocation;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "partialnav=info";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const IDLE_TIMEOUT: Duration = Duration::from_secs(20);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("partialnav: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> NavResult<()> {
    let invocation = script::parse_args(std::env::args().skip(1))?;
    if invocation.help {
        println!("{}", script::USAGE);
        return Ok(());
    }

    let config = session_config(&invocation)?;
    let client = Http11Client::new(config.parsed_origin()?).with_timeout(REQUEST_TIMEOUT);
    let page = fetch_page(&client, &invocation.start)?;
    let history = SessionHistory::new(Location::parse(&invocation.start)?);

    let mut session = Session::start(
        config,
        history,
        ThreadedExchange::new(client),
        SystemClock,
        &page,
    )?;
    session.run_until_idle(IDLE_TIMEOUT);
    print_state(&session);

    let mut prompt = TerminalPrompt {
        assume: invocation.assume,
    };
    for (raw, step) in &invocation.steps {
        let gesture = step.resolve(session.document())?;
        let disposition = session.dispatch(gesture, &mut prompt)?;
        println!("\n> {raw}: {disposition:?}");
        session.run_until_idle(IDLE_TIMEOUT);

        let mut redirected = false;
        for event in session.drain_events() {
            println!("  event: {event:?}");
            redirected |= matches!(event, SessionEvent::HardRedirect(_));
        }
        print_state(&session);
        if redirected {
            info!(target: "partialnav::app", "stopping after hard redirect");
            break;
        }
    }
    Ok(())
}

fn session_config(invocation: &Invocation) -> NavResult<SessionConfig> {
    let mut config = SessionConfig::from_env()?;
    if let Some(origin) = &invocation.origin {
        config = config.with_origin(origin.clone());
    }
    if let Some(guild) = &invocation.guild {
        config = config.with_guild(guild.clone());
    }
    if let Some(storage) = &invocation.storage {
        config = config.with_storage_root(storage.clone());
    }
    if invocation.analytics {
        config = config.with_analytics(true);
    }
    Ok(config.with_ephemeral(invocation.ephemeral))
}

/// Full page load of the starting URL.
fn fetch_page(client: &Http11Client, start: &str) -> NavResult<String> {
    let location = Location::parse(start)?;
    let response = client.execute(&FragmentRequest::get(location.path_and_query()))?;
    if !response.is_success() {
        return Err(NavError::new(
            "app.page_status",
            format!("GET {} returned {}", location.href(), response.status),
        ));
    }
    info!(
        target: "partialnav::app",
        url = %client.origin().url_for(&location.path_and_query()),
        bytes = response.body.len(),
        "page loaded"
    );
    Ok(response.text())
}

fn print_state<E: Exchange, K: Clock>(session: &Session<E, K>) {
    let doc = session.document();
    let content = doc.content();
    println!("location: {}", session.location().href());
    println!(
        "content: {} forms, {} buttons, {} partial links (generation {})",
        content.forms.len(),
        content.buttons.len(),
        content.partial_links.len(),
        doc.content_generation()
    );
    if let Some(tab) = doc.active_tab() {
        println!("tab: {tab}");
    }
    for notification in doc.notifications() {
        match &notification.text {
            Some(text) => println!("  [{:?}] {} ({text})", notification.kind, notification.title),
            None => println!("  [{:?}] {}", notification.kind, notification.title),
        }
    }
    for select in &content.selects {
        let Some(line) = doc.status(select.id).filter(|line| !line.text.is_empty()) else {
            continue;
        };
        println!(
            "  {}: {}",
            select.name.as_deref().unwrap_or("select"),
            line.text
        );
    }
    if doc.unsaved_popup.visible {
        println!("unsaved: {}", doc.unsaved_popup.message);
    }
    println!(
        "theme: {:?}, sidebar {}",
        doc.theme,
        if doc.sidebar_collapsed { "collapsed" } else { "open" }
    );
}

/// Answers confirmations from a flag or from stdin.
struct TerminalPrompt {
    assume: Option<bool>,
}

impl ConfirmPrompt for TerminalPrompt {
    fn confirm(&mut self, message: &str) -> bool {
        if let Some(answer) = self.assume {
            println!("confirm: {message} [{}]", if answer { "yes" } else { "no" });
            return answer;
        }

        print!("confirm: {message} [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}
