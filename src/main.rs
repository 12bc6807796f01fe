/*
 * Headless driver: classifies the directories given on the command line and logs
 * the resulting package previews.
 *
 *   sip_preview <whole|file|folder[:N]> <path>...
 */
use sip_preview::app_logic::ClassificationSession;
use sip_preview::core::{ClassificationKind, CoreConfigManager, JobState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const APP_NAME: &str = "SipPreview";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn parse_kind(arg: &str) -> Option<ClassificationKind> {
    match arg.split_once(':') {
        None if arg == "whole" => Some(ClassificationKind::WholeSelection),
        None if arg == "file" => Some(ClassificationKind::PerFile),
        None if arg == "folder" => Some(ClassificationKind::PerFolder { max_level: 1 }),
        Some(("folder", level)) => level
            .parse()
            .ok()
            .map(|max_level| ClassificationKind::PerFolder { max_level }),
        _ => None,
    }
}

fn main() -> ExitCode {
    sip_preview::initialize_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(kind) = args.first().and_then(|a| parse_kind(a)) else {
        eprintln!("Usage: sip_preview <whole|file|folder[:N]> <path>...");
        return ExitCode::from(2);
    };
    let sources: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();
    if sources.is_empty() {
        eprintln!("Usage: sip_preview <whole|file|folder[:N]> <path>...");
        return ExitCode::from(2);
    }

    let mut session =
        match ClassificationSession::new(APP_NAME, Arc::new(CoreConfigManager::new())) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Main: Could not open a classification session: {e}");
                return ExitCode::FAILURE;
            }
        };

    let rule = session.submit_rule(sources, kind, None);
    loop {
        let state = session.wait_for_rule(rule, POLL_INTERVAL);
        match session.poll_packages(rule) {
            Ok(previews) => {
                for preview in previews {
                    log::info!(
                        "Main: {} '{}' with {} file(s).",
                        preview.id(),
                        preview.name(),
                        preview.file_count()
                    );
                }
            }
            Err(e) => {
                log::error!("Main: {e}");
                return ExitCode::FAILURE;
            }
        }
        if state.is_finished() {
            break;
        }
    }

    let Some(outcome) = session.rule_outcome(rule) else {
        log::warn!("Main: {rule} finished without a walk report.");
        return ExitCode::FAILURE;
    };
    for issue in &outcome.issues {
        log::warn!("Main: {issue:?}");
    }
    log::info!(
        "Main: {rule} {:?}: {} package(s) from {} file(s) in {} folder(s), {} issue(s).",
        session.rule_state(rule),
        outcome.packages,
        outcome.files_visited,
        outcome.directories_visited,
        outcome.issues.len()
    );
    if session.rule_state(rule) == JobState::Done && outcome.is_complete_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
