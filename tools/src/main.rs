//! ledger-runner: headless driver for the chase points ledger.
//!
//! Usage:
//!   ledger-runner --db ledger.db                    # audit + summary
//!   ledger-runner --db ledger.db --ipc-mode         # JSON lines on stdin/stdout
//!   ledger-runner --db ledger.db --data-dir ./data --code-seed 7

use anyhow::Result;
use chase_core::{
    catalog::Platform,
    clock::SystemClock,
    config::LedgerConfig,
    engine::PointsEngine,
    error::LedgerError,
    payment::PaymentCompleted,
    rng::CodeRng,
    store::{LedgerReader, LedgerStore},
};
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Enroll {
        email: String,
    },
    Award {
        user_id: String,
        action: String,
        #[serde(default)]
        external_event_id: Option<String>,
    },
    Share {
        user_id: String,
        platform: String,
    },
    JoinContest {
        user_id: String,
    },
    Payment(PaymentCompleted),
    Claim {
        user_id: String,
        sequence: i64,
    },
    Status {
        user_id: String,
    },
    Entries {
        user_id: String,
    },
    PendingEvents {
        #[serde(default = "default_event_limit")]
        limit: usize,
    },
    AcknowledgeEvents {
        ids: Vec<i64>,
    },
    Quit,
}

fn default_event_limit() -> usize {
    100
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let code_seed: Option<u64> = string_arg(&args, "--code-seed").and_then(|s| s.parse().ok());

    if !ipc_mode {
        println!("Chase ledger: ledger-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let config = LedgerConfig::load(data_dir)?;
    let store = LedgerStore::open(db)?;
    store.migrate()?;

    let mut engine = PointsEngine::new(store, config, Arc::new(SystemClock));
    if let Some(seed) = code_seed {
        engine = engine.with_code_rng(CodeRng::seeded(seed));
    }

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        print_summary(&engine)?;
    }

    Ok(())
}

fn run_ipc_loop(engine: &PointsEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Unparseable command: {e}");
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        if let IpcCommand::Quit = cmd {
            break;
        }

        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => {
                if !e.is_transient() {
                    log::warn!("Command rejected: {e}");
                } else {
                    log::error!("Command failed, safe to retry: {e}");
                }
                json!({ "error": e.to_string(), "transient": e.is_transient() })
            }
        };
        writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &PointsEngine, cmd: IpcCommand) -> Result<Value, LedgerError> {
    let reply = match cmd {
        IpcCommand::Enroll { email } => {
            let (user, signup) = engine.enroll(&email)?;
            json!({ "user": user, "signup": signup })
        }
        IpcCommand::Award { user_id, action, external_event_id } => {
            let outcome = engine.award_named(&user_id, &action, external_event_id.as_deref())?;
            serde_json::to_value(outcome)?
        }
        IpcCommand::Share { user_id, platform } => {
            let platform: Platform = platform.parse()?;
            serde_json::to_value(engine.record_share(&user_id, platform)?)?
        }
        IpcCommand::JoinContest { user_id } => serde_json::to_value(engine.join_contest(&user_id)?)?,
        IpcCommand::Payment(event) => serde_json::to_value(engine.on_payment_completed(&event)?)?,
        IpcCommand::Claim { user_id, sequence } => {
            serde_json::to_value(engine.claim(&user_id, sequence)?.to_response())?
        }
        IpcCommand::Status { user_id } => serde_json::to_value(engine.status(&user_id)?)?,
        IpcCommand::Entries { user_id } => {
            let entries = engine.store.list_by_user(&user_id, None)?;
            let commissions = engine.referral_commissions(&user_id)?;
            json!({ "entries": entries, "commissions": commissions })
        }
        IpcCommand::PendingEvents { limit } => {
            serde_json::to_value(engine.store.pending_events(limit)?)?
        }
        IpcCommand::AcknowledgeEvents { ids } => {
            let acknowledged = engine.store.acknowledge_events(&ids, chrono::Utc::now())?;
            json!({ "acknowledged": acknowledged })
        }
        IpcCommand::Quit => Value::Null,
    };
    Ok(reply)
}

fn print_summary(engine: &PointsEngine) -> Result<()> {
    let user_ids = engine.audit_all()?;
    let pending = engine.store.pending_event_count()?;

    println!("=== LEDGER SUMMARY ===");
    println!("  users:          {}", user_ids.len());
    println!("  pending events: {pending}");
    println!("  audit:          balances match ledger");

    if user_ids.is_empty() {
        return Ok(());
    }

    println!();
    println!("=== USERS ===");
    let mut total_points = 0;
    let mut total_cents = 0;
    for id in &user_ids {
        let Some(user) = engine.store.user(id)? else { continue };
        let cents = engine.commission_total_cents(id)?;
        total_points += user.balance;
        total_cents += cents;
        println!(
            "  {:<32} | {:>8} | {:>6} pts | target {:>6} | seq {:>3} | commission ${:.2}",
            user.email,
            user.referral_code,
            user.balance,
            user.target.unwrap_or_default(),
            user.sequence,
            cents as f64 / 100.0
        );
    }
    println!();
    println!("  total points:     {total_points}");
    println!("  total commission: ${:.2}", total_cents as f64 / 100.0);
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
