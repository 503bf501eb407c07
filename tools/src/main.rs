//! timer-runner: headless turn-timer session runner.
//!
//! Usage:
//!   timer-runner --players 3 --npcs 2 --seconds 120 --seed 7 --drop-rate 0.1
//!   timer-runner --config timer.json --db session.db
//!   timer-runner --ipc-mode
//!   timer-runner --realtime --seconds 45

use anyhow::Result;
use std::env;
use std::io::{self, BufRead, Write};
use turn_timer_core::{
    config::TimerConfig,
    encounter::{Encounter, Participant, SessionUser},
    harness::{HarnessOptions, Pacing, SessionHarness},
    policy::ParticipantClass,
    presenter::HudUpdate,
    snapshot::STATE_FLAG,
    Intent, Phase,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Advance {
        ms: i64,
    },
    Intent {
        intent:  Intent,
        #[serde(default)]
        replica: Option<usize>,
    },
    Pause {
        paused: bool,
    },
    Style {
        file: Option<String>,
    },
    Disconnect {
        replica: usize,
    },
    Reconnect {
        replica: usize,
    },
    End,
    Quit,
}

#[derive(serde::Serialize)]
struct UiState {
    now:        i64,
    round:      u32,
    turn:       usize,
    phase:      Phase,
    revision:   u64,
    host:       Option<HudUpdate>,
    replicas:   Vec<Option<HudUpdate>>,
    divergence: u32,
    delivered:  u64,
    dropped:    u64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let players = parse_arg(&args, "--players", 3usize);
    let npcs = parse_arg(&args, "--npcs", 2usize);
    let seconds = parse_arg(&args, "--seconds", 120i64);
    let drop_rate = parse_arg(&args, "--drop-rate", 0.0f64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let pacing = if args.iter().any(|a| a == "--realtime") { Pacing::Realtime } else { Pacing::Stepped };
    let db = string_arg(&args, "--db");
    let config = match string_arg(&args, "--config") {
        Some(path) => TimerConfig::load(&path)?,
        None => TimerConfig::default(),
    };

    if !ipc_mode {
        println!("turn-timer: timer-runner");
        println!("  seed:      {seed}");
        println!("  players:   {players}");
        println!("  npcs:      {npcs}");
        println!("  seconds:   {seconds}");
        println!("  drop rate: {drop_rate}");
        println!("  pacing:    {pacing:?}");
        println!("  db:        {}", db.as_deref().unwrap_or(":memory:"));
        println!();
    }

    let (encounter, users) = build_encounter(players, npcs);
    let options = HarnessOptions {
        config,
        db_path: db,
        loss: (drop_rate > 0.0).then_some((seed, drop_rate)),
        pacing,
        ..HarnessOptions::default()
    };
    let mut session = SessionHarness::new(options, encounter, users)?;
    session.start_encounter();

    if ipc_mode {
        run_ipc_loop(&mut session)?;
    } else {
        let max_divergence = run_scripted(&mut session, seconds);
        print_summary(&session, seconds, max_divergence)?;
    }
    Ok(())
}

/// Players each owned by their own user; NPCs owned by nobody.
fn build_encounter(players: usize, npcs: usize) -> (Encounter, Vec<SessionUser>) {
    let mut participants = Vec::with_capacity(players + npcs);
    let mut users = Vec::with_capacity(players);
    for i in 0..players {
        let user = format!("player-{}", i + 1);
        participants.push(
            Participant::new(uuid::Uuid::new_v4().to_string(), format!("Hero {}", i + 1), ParticipantClass::Primary)
                .owned_by(user.clone()),
        );
        users.push(SessionUser { id: user, is_admin: false });
    }
    for i in 0..npcs {
        participants.push(Participant::new(
            uuid::Uuid::new_v4().to_string(),
            format!("Goblin {}", i + 1),
            ParticipantClass::Secondary,
        ));
    }
    (Encounter::new(uuid::Uuid::new_v4().to_string(), participants), users)
}

/// Let the clock run, resuming a start pause after two seconds.
fn run_scripted(session: &mut SessionHarness, seconds: i64) -> u32 {
    let mut max_divergence = 0;
    for second in 0..seconds {
        if second == 2 && session.host().clock().paused {
            session.host_intent(Intent::Resume);
        }
        session.advance(1_000);
        max_divergence = max_divergence.max(session.divergence());
    }
    max_divergence
}

fn run_ipc_loop(session: &mut SessionHarness) -> Result<()> {
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

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => {}
            IpcCommand::Advance { ms } => session.advance(ms),
            IpcCommand::Intent { intent, replica: None } => session.host_intent(intent),
            IpcCommand::Intent { intent, replica: Some(i) } if i < session.replica_count() => {
                session.replica_intent(i, intent)
            }
            IpcCommand::Pause { paused } => session.pause_session(paused),
            IpcCommand::Style { file } => session.force_style(file),
            IpcCommand::Disconnect { replica } if replica < session.replica_count() => {
                session.disconnect(replica)
            }
            IpcCommand::Reconnect { replica } if replica < session.replica_count() => {
                session.reconnect(replica)
            }
            IpcCommand::End => session.end_encounter(),
            _ => log::warn!("ignoring command for unknown replica"),
        }
        writeln!(stdout, "{}", serde_json::to_string(&build_ui_state(session))?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn build_ui_state(session: &SessionHarness) -> UiState {
    let stats = session.bus_stats();
    UiState {
        now:        session.now(),
        round:      session.encounter.round,
        turn:       session.encounter.turn,
        phase:      session.host().phase(),
        revision:   session.host().clock().revision,
        host:       session.host().displayed().cloned(),
        replicas:   (0..session.replica_count())
            .map(|i| session.replica(i).displayed().cloned())
            .collect(),
        divergence: session.divergence(),
        delivered:  stats.delivered,
        dropped:    stats.dropped,
    }
}

fn print_summary(session: &SessionHarness, seconds: i64, max_divergence: u32) -> Result<()> {
    let host = session.host_user();
    let stats = session.bus_stats();
    let encounter_id = &session.encounter.id;

    println!("=== SESSION SUMMARY ===");
    println!("  encounter:      {encounter_id}");
    println!("  seconds run:    {seconds}");
    println!("  final round:    {}", session.encounter.round);
    println!("  final turn:     {}", session.encounter.turn);
    println!("  revision:       {}", session.host().clock().revision);
    println!("  turns started:  {}", session.count_events(host, "turn_started"));
    println!("  warnings:       {}", session.count_events(host, "warning"));
    println!("  expiries:       {}", session.count_events(host, "expired"));
    println!("  sound cues:     {}", session.cues().len());
    println!("  delivered:      {}", stats.delivered);
    println!("  dropped:        {}", stats.dropped);
    println!("  max divergence: {max_divergence}s");

    if let Some(store) = session.inspector() {
        let writes = store.flag_write_count(encounter_id, STATE_FLAG)?;
        let logged = store.events_for_encounter(encounter_id)?.len();
        println!("  state writes:   {writes}");
        println!("  logged events:  {logged}");
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}
