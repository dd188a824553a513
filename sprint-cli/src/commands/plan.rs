//! Show the phase timeline of the configured session.

use anyhow::{Context, Result};
use sprintsync_types::{Phase, SessionConfig};

use super::clock_text;
use crate::config::Config;

/// Run the plan command.
pub fn run(config: &Config, json: bool) -> Result<()> {
    let session = config
        .session
        .to_session_config()
        .context("Invalid [session] configuration")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("Sprint session plan");
    println!();
    for (i, line) in timeline(&session).iter().enumerate() {
        println!("  {}. {}", i + 1, line);
    }
    println!();
    println!("Total reps:   {}", session.total_reps());
    println!("Timed phases: {}", clock_text(timed_secs(&session)));

    Ok(())
}

/// One line per planned phase.
fn timeline(session: &SessionConfig) -> Vec<String> {
    session
        .plan
        .iter()
        .map(|&phase| {
            let detail = match phase {
                Phase::Sprint => format!(
                    "{} x {} m, {} rest",
                    session.sprint.reps,
                    session.sprint.distance_m,
                    clock_text(session.sprint.rest_secs as u64)
                ),
                _ => match (session.block(phase), session.duration_secs(phase)) {
                    (Some((reps, distance_m)), _) => format!("{} x {} m", reps, distance_m),
                    (None, Some(secs)) => clock_text(secs as u64),
                    (None, None) => String::new(),
                },
            };
            format!("{:<10} {}", phase.title(), detail)
        })
        .collect()
}

/// Countdown time in the plan, rests included.
fn timed_secs(session: &SessionConfig) -> u64 {
    let blocks: u64 = session
        .plan
        .iter()
        .filter_map(|&phase| session.duration_secs(phase))
        .map(u64::from)
        .sum();
    let rests = if session.is_planned(Phase::Sprint) {
        session.sprint.reps.saturating_sub(1) as u64 * session.sprint.rest_secs as u64
    } else {
        0
    };
    blocks + rests
}
