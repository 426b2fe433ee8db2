//! mird-track - drive the MIRD analytics client from the command line
//!
//! Every invocation behaves like one page load in the same browser tab:
//! consent and record buffers persist in `$XDG_DATA_HOME/mird/client/local`,
//! the session id and page-view count in `$XDG_DATA_HOME/mird/client/session`.
//!
//! Submissions are awaited before the process exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mird_core::client::{AnalyticsClient, ClientStores, HttpTransport, SystemClock};
use mird_core::geo::GeoLookup;
use mird_core::store::FileStore;
use mird_core::{Config, ConsentRecord, ConsentStore, PageContext};

#[derive(Parser)]
#[command(name = "mird-track")]
#[command(about = "Record MIRD landing-page analytics")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Page path the records refer to
    #[arg(long, global = true, default_value = "/")]
    page: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save a cookie consent choice
    Consent {
        #[arg(value_enum)]
        choice: ConsentChoice,

        /// Allow functional cookies (with `custom`)
        #[arg(long)]
        functional: bool,

        /// Allow analytics cookies (with `custom`)
        #[arg(long)]
        analytics: bool,
    },

    /// Record a page load
    Pageview {
        /// Document title
        #[arg(long, default_value = "")]
        title: String,

        /// Document referrer
        #[arg(long, default_value = "")]
        referrer: String,
    },

    /// Record an interaction event
    Event {
        category: String,
        action: String,

        #[arg(long)]
        label: Option<String>,

        #[arg(long)]
        value: Option<f64>,
    },

    /// Send the session-end beacon
    EndSession,

    /// Decide the enrolment redirect and record it
    Enroll,

    /// Resend records from the failed queue
    Retry,

    /// Show consent, session and buffer state
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConsentChoice {
    AcceptAll,
    EssentialOnly,
    Custom,
}

type Client = AnalyticsClient<HttpTransport>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(
            mird_core::logging::init(&config.logging, "track")
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    let stores = open_stores()?;
    let page = PageContext {
        path: args.page,
        ..Default::default()
    };

    match args.command {
        Command::Consent {
            choice,
            functional,
            analytics,
        } => cmd_consent(&config, stores, page, choice, functional, analytics).await,
        Command::Pageview { title, referrer } => {
            let page = PageContext {
                title,
                referrer,
                ..page
            };
            cmd_pageview(&config, stores, page).await
        }
        Command::Event {
            category,
            action,
            label,
            value,
        } => cmd_event(&config, stores, page, &category, &action, label.as_deref(), value).await,
        Command::EndSession => cmd_end_session(&config, stores, page).await,
        Command::Enroll => cmd_enroll(&config, stores, page).await,
        Command::Retry => cmd_retry(&config, stores, page).await,
        Command::Status => cmd_status(&config, stores, page),
    }
}

fn open_stores() -> Result<ClientStores> {
    let dir = Config::client_store_dir();
    let local = FileStore::open(dir.join("local")).context("failed to open local store")?;
    let session = FileStore::open(dir.join("session")).context("failed to open session store")?;

    Ok(ClientStores {
        local: Arc::new(local),
        session: Arc::new(session),
    })
}

fn client(config: &Config, stores: ClientStores, page: PageContext) -> Result<Client> {
    let transport =
        Arc::new(HttpTransport::new(&config.client).context("failed to create transport")?);
    AnalyticsClient::new(&config.client, transport, stores, page, Arc::new(SystemClock))
        .context("failed to create analytics client")
}

async fn cmd_consent(
    config: &Config,
    stores: ClientStores,
    page: PageContext,
    choice: ConsentChoice,
    functional: bool,
    analytics: bool,
) -> Result<()> {
    let consent = ConsentStore::new(Arc::clone(&stores.local));
    let mut client = client(config, stores, page)?;
    client.resume();

    let record = match choice {
        ConsentChoice::AcceptAll => consent.accept_all(),
        ConsentChoice::EssentialOnly => consent.essential_only(),
        ConsentChoice::Custom => consent.save_preferences(functional, analytics),
    }
    .context("failed to save consent")?;

    client.update_consent(record.analytics);
    client.flush().await;

    print_consent(&record);
    Ok(())
}

async fn cmd_pageview(config: &Config, stores: ClientStores, page: PageContext) -> Result<()> {
    let mut client = client(config, stores, page)?;
    client.init();
    client.flush().await;

    if client.consent_given() {
        println!(
            "Page view {} recorded (session {})",
            client.session().page_view_count,
            client.session().id
        );
    } else {
        println!("Analytics consent not given, nothing recorded");
    }
    Ok(())
}

async fn cmd_event(
    config: &Config,
    stores: ClientStores,
    page: PageContext,
    category: &str,
    action: &str,
    label: Option<&str>,
    value: Option<f64>,
) -> Result<()> {
    let mut client = client(config, stores, page)?;
    client.resume();
    client.track_event(category, action, label, value);
    client.flush().await;

    if client.consent_given() {
        println!("Event {category}/{action} recorded");
    } else {
        println!("Analytics consent not given, nothing recorded");
    }
    Ok(())
}

async fn cmd_end_session(config: &Config, stores: ClientStores, page: PageContext) -> Result<()> {
    let mut client = client(config, stores, page)?;
    client.resume();
    client.page_unload();
    client.flush().await;

    println!("Session end sent for {}", client.session().id);
    Ok(())
}

async fn cmd_enroll(config: &Config, stores: ClientStores, page: PageContext) -> Result<()> {
    let lookup = GeoLookup::new(&config.geo).context("failed to create geo lookup")?;
    let target = lookup.resolve_enroll_target().await;

    let mut client = client(config, stores, page)?;
    client.resume();
    client.handle(target.interaction());
    client.flush().await;

    println!("{}", target.url());
    Ok(())
}

async fn cmd_retry(config: &Config, stores: ClientStores, page: PageContext) -> Result<()> {
    let mut client = client(config, stores, page)?;
    client.resume();

    if !client.consent_given() {
        println!("Analytics consent not given, nothing sent");
        return Ok(());
    }

    let report = client
        .retry_failed()
        .await
        .context("failed to retry queued records")?;
    println!("Sent:     {}", report.sent);
    println!("Requeued: {}", report.requeued);
    Ok(())
}

fn cmd_status(config: &Config, stores: ClientStores, page: PageContext) -> Result<()> {
    let consent = ConsentStore::new(Arc::clone(&stores.local)).get();
    let client = client(config, stores, page)?;

    println!("MIRD Analytics Client");
    println!("=====================");
    println!();
    println!("Endpoint:        {}", config.client.endpoint);
    println!();
    print_consent(&consent);
    println!();
    println!("Session:         {}", client.session().id);
    println!("Page Views:      {}", client.session().page_view_count);
    println!(
        "Buffered:        {}",
        client.backup().len().context("failed to read backup buffer")?
    );
    println!(
        "Failed:          {}",
        client.failed().len().context("failed to read failed queue")?
    );
    Ok(())
}

fn print_consent(record: &ConsentRecord) {
    let flag = |on: bool| if on { "yes" } else { "no" };

    println!("Consent Given:   {}", flag(record.accepted));
    println!("  Essential:     {}", flag(record.essential));
    println!("  Functional:    {}", flag(record.functional));
    println!("  Analytics:     {}", flag(record.analytics));
    if let Some(timestamp) = record.timestamp {
        println!("  Saved At:      {}", timestamp.to_rfc3339());
    }
}
