use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chat_ledger::{
    export_csv, ChatLedger, EntryType, ExportQuery, Settings, SqliteStore, SystemClock,
};

const USAGE: &str = "Usage:
  chat-ledger chat                               interactive chat against the ledger
  chat-ledger report <message>                   run a report, e.g. \"έξοδα Ιανουαρίου\"
  chat-ledger merchant <token> <category>        remember a merchant category
  chat-ledger export <from> <to> [type] [property]  print CSV (dates as YYYY-MM-DD)

Environment: CHAT_LEDGER_DB, CHAT_LEDGER_VOCAB, CHAT_LEDGER_ENGINE, CHAT_LEDGER_CONVERSATION,
             RUST_LOG";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_ledger=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = Settings::from_env();

    match args.first().map(String::as_str) {
        Some("chat") | None => run_chat(&settings),
        Some("report") => run_report(&settings, &args[1..].join(" ")),
        Some("merchant") => match &args[1..] {
            [token, category] => run_merchant(&settings, token, category),
            _ => bail!("merchant needs <token> <category>\n\n{}", USAGE),
        },
        Some("export") => run_export(&settings, &args[1..]),
        Some("help") | Some("--help") | Some("-h") => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

/// Engine over the configured SQLite database
fn open_engine(settings: &Settings) -> Result<ChatLedger> {
    let lexicon = settings.load_lexicon()?;
    let store = Arc::new(SqliteStore::open(&settings.db_path)?);

    Ok(ChatLedger::new(
        Arc::new(lexicon),
        settings.load_engine_config()?,
        store.clone(),
        store.clone(),
        store,
        Arc::new(SystemClock),
    ))
}

fn run_chat(settings: &Settings) -> Result<()> {
    let engine = open_engine(settings)?;
    let caller = env::var("USER").unwrap_or_else(|_| "cli".to_string());

    println!("💬 Chat Ledger v{}", chat_ledger::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📂 Database: {}", settings.db_path.display());
    println!("   Γράψε μια κίνηση ή αναφορά. Ctrl-D για έξοδο.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match engine.handle(line.trim(), &settings.conversation_id, &caller) {
            Ok(reply) => println!("{}\n", reply.text),
            Err(e) => eprintln!("❌ {}\n", e.user_message()),
        }
    }

    println!("\n👋 Bye");
    Ok(())
}

fn run_report(settings: &Settings, message: &str) -> Result<()> {
    let engine = open_engine(settings)?;
    let reply = engine
        .handle_report(message, &settings.conversation_id)
        .context("Report failed")?;

    println!("{}", reply.text);
    Ok(())
}

fn run_merchant(settings: &Settings, token: &str, category: &str) -> Result<()> {
    let engine = open_engine(settings)?;

    match engine.merchants().set(token, category)? {
        Some(mapping) => println!("✓ Merchant '{}' → {}", mapping.token, mapping.category),
        None => bail!("Token and category must not be empty"),
    }
    Ok(())
}

fn run_export(settings: &Settings, args: &[String]) -> Result<()> {
    let (from, to) = match args {
        [from, to, ..] => (parse_day(from)?, parse_day(to)?),
        _ => bail!("export needs <from> <to>\n\n{}", USAGE),
    };

    let entry_type = match args.get(2) {
        Some(t) if t != "-" && t != "all" => {
            Some(EntryType::parse(t).with_context(|| format!("Unknown type '{}'", t))?)
        }
        _ => None,
    };

    let query = ExportQuery {
        date_from: from,
        date_to: to,
        entry_type,
        property: args.get(3).cloned(),
    };

    let store = SqliteStore::open(&settings.db_path)?;
    let csv = export_csv(&store, &query).context("Export failed")?;
    print!("{}", csv);
    Ok(())
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD)", s))
}
