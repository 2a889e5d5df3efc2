use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use snafu::{OptionExt, ResultExt, Snafu};

use wisp_storage::{
    ChatBackend, LatencyProfile, MemoryBackend, NewMessage, Role, StorageError, ThreadId,
    token_estimate,
};
use wisp_sync::{
    ActivationMonitor, BroadcastBus, BusEvent, DropTarget, FolderId, FolderManager, ScopeKey,
    SelectionController, SurfaceTag, SyncError, TitleEditController, ViewStateStore,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    BusOrdering,
    LateSubscriber,
    AggregateConsistency,
    TrimRegenerate,
    NewChatStaging,
    SelectionConvergence,
    TitlePrecedence,
    TitleEchoGuard,
    FolderGuards,
    FolderExclusivity,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bus_ordering" => Some(Self::BusOrdering),
            "late_subscriber" => Some(Self::LateSubscriber),
            "aggregate_consistency" => Some(Self::AggregateConsistency),
            "trim_regenerate" => Some(Self::TrimRegenerate),
            "new_chat_staging" => Some(Self::NewChatStaging),
            "selection_convergence" => Some(Self::SelectionConvergence),
            "title_precedence" => Some(Self::TitlePrecedence),
            "title_echo_guard" => Some(Self::TitleEchoGuard),
            "folder_guards" => Some(Self::FolderGuards),
            "folder_exclusivity" => Some(Self::FolderExclusivity),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::BusOrdering => "bus_ordering",
            Self::LateSubscriber => "late_subscriber",
            Self::AggregateConsistency => "aggregate_consistency",
            Self::TrimRegenerate => "trim_regenerate",
            Self::NewChatStaging => "new_chat_staging",
            Self::SelectionConvergence => "selection_convergence",
            Self::TitlePrecedence => "title_precedence",
            Self::TitleEchoGuard => "title_echo_guard",
            Self::FolderGuards => "folder_guards",
            Self::FolderExclusivity => "folder_exclusivity",
            Self::All => "all",
        }
    }

    fn needs_state_dir(&self) -> bool {
        !matches!(
            self,
            Self::BusOrdering | Self::LateSubscriber | Self::AggregateConsistency | Self::TrimRegenerate
        )
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("missing required --state argument for scenario '{scenario}'"))]
    MissingStateDir {
        stage: &'static str,
        scenario: &'static str,
    },
    #[snafu(display("backend call failed: {source}"))]
    Backend {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("sync operation failed: {source}"))]
    Sync {
        stage: &'static str,
        source: SyncError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("file operation failed at '{path}': {source}"))]
    FileIo {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
    println!("runner_ok=true");
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    if args.scenario.needs_state_dir() && args.state_dir.is_none() {
        return MissingStateDirSnafu {
            stage: "run-require-state-dir",
            scenario: args.scenario.name(),
        }
        .fail();
    }

    match args.scenario {
        Scenario::All => {
            let ordered = [
                Scenario::BusOrdering,
                Scenario::LateSubscriber,
                Scenario::AggregateConsistency,
                Scenario::TrimRegenerate,
                Scenario::NewChatStaging,
                Scenario::SelectionConvergence,
                Scenario::TitlePrecedence,
                Scenario::TitleEchoGuard,
                Scenario::FolderGuards,
                Scenario::FolderExclusivity,
            ];
            for scenario in ordered {
                if scenario.needs_state_dir() && args.state_dir.is_none() {
                    return MissingStateDirSnafu {
                        stage: "run-all-require-state-dir",
                        scenario: scenario.name(),
                    }
                    .fail();
                }
                run_scenario(scenario, args.state_dir.as_deref()).await?;
            }
            Ok(())
        }
        scenario => run_scenario(scenario, args.state_dir.as_deref()).await,
    }
}

async fn run_scenario(scenario: Scenario, state_dir: Option<&Path>) -> RunnerResult<()> {
    println!("scenario={}", scenario.name());
    match scenario {
        Scenario::BusOrdering => run_bus_ordering(),
        Scenario::LateSubscriber => run_late_subscriber(),
        Scenario::AggregateConsistency => run_aggregate_consistency().await,
        Scenario::TrimRegenerate => run_trim_regenerate().await,
        Scenario::NewChatStaging => {
            run_new_chat_staging(fresh_store(state_dir, scenario)?).await
        }
        Scenario::SelectionConvergence => {
            run_selection_convergence(fresh_store(state_dir, scenario)?).await
        }
        Scenario::TitlePrecedence => run_title_precedence(fresh_store(state_dir, scenario)?).await,
        Scenario::TitleEchoGuard => run_title_echo_guard(fresh_store(state_dir, scenario)?).await,
        Scenario::FolderGuards => run_folder_guards(fresh_store(state_dir, scenario)?),
        Scenario::FolderExclusivity => run_folder_exclusivity(fresh_store(state_dir, scenario)?),
        Scenario::All => unreachable!("expanded by the caller"),
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut state_dir = None;
    let mut pending = args.into_iter();

    // The parser is intentionally strict to keep scenario execution
    // deterministic in CI.
    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;
                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--state" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-state-value",
                    arg: "--state",
                })?;
                state_dir = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        state_dir,
    })
}

/// Every state-backed scenario starts from an empty file so reruns stay
/// deterministic.
fn fresh_store(state_dir: Option<&Path>, scenario: Scenario) -> RunnerResult<Arc<ViewStateStore>> {
    let dir = state_dir.expect("state dir checked by the caller");
    let path = dir.join(format!("qa-{}.json", scenario.name()));
    if path.exists() {
        std::fs::remove_file(&path).context(FileIoSnafu {
            stage: "fresh-store-remove-previous",
            path: path.display().to_string(),
        })?;
    }
    Ok(Arc::new(ViewStateStore::open(path)))
}

fn check(scenario: &'static str, condition: bool, reason: &str) -> RunnerResult<()> {
    if condition {
        Ok(())
    } else {
        ScenarioFailedSnafu {
            stage: "scenario-check",
            scenario,
            reason: reason.to_string(),
        }
        .fail()
    }
}

fn run_bus_ordering() -> RunnerResult<()> {
    let bus = BroadcastBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&seen);
    let _first = bus.subscribe(move |_| first.lock().unwrap().push(1));
    let second = Arc::clone(&seen);
    let _second = bus.subscribe(move |_| second.lock().unwrap().push(2));

    bus.publish(&BusEvent::SelectionCleared {
        scope: ScopeKey::new("qa"),
    });

    check(
        "bus_ordering",
        *seen.lock().unwrap() == vec![1, 2],
        "listeners must fire in registration order",
    )
}

fn run_late_subscriber() -> RunnerResult<()> {
    let bus = BroadcastBus::new();
    bus.publish(&BusEvent::SelectionCleared {
        scope: ScopeKey::new("qa"),
    });

    let seen = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&seen);
    let _subscription = bus.subscribe(move |_| *counter.lock().unwrap() += 1);

    check(
        "late_subscriber",
        *seen.lock().unwrap() == 0,
        "a subscriber mounted after a publish must miss it",
    )
}

async fn run_aggregate_consistency() -> RunnerResult<()> {
    let backend = MemoryBackend::new(LatencyProfile::Disabled);
    let thread = backend
        .create_thread(None)
        .await
        .context(BackendSnafu { stage: "aggregate-create" })?;

    for content in ["short", "a longer message body", "middle"] {
        backend
            .add_message(thread.id, NewMessage::new(Role::User, content))
            .await
            .context(BackendSnafu { stage: "aggregate-append" })?;
        backend
            .generate_response(thread.id, content.to_string())
            .await
            .context(BackendSnafu { stage: "aggregate-generate" })?;
    }

    let messages = backend
        .list_messages(thread.id)
        .await
        .context(BackendSnafu { stage: "aggregate-list-messages" })?;
    let record = backend
        .get_by_id(thread.id)
        .await
        .context(BackendSnafu { stage: "aggregate-get" })?
        .expect("thread just created");

    let expected_chars: u64 = messages.iter().map(|message| message.size_chars).sum();
    let expected_tokens: u64 = messages
        .iter()
        .map(|message| token_estimate(message.size_chars))
        .sum();

    check(
        "aggregate_consistency",
        record.size_chars == expected_chars && record.size_tokens == expected_tokens,
        "thread aggregates must equal the sum over retained messages",
    )
}

async fn run_trim_regenerate() -> RunnerResult<()> {
    let backend = MemoryBackend::new(LatencyProfile::Disabled);
    let thread = backend
        .create_thread(None)
        .await
        .context(BackendSnafu { stage: "trim-create" })?;

    backend
        .add_message(thread.id, NewMessage::new(Role::User, "u1"))
        .await
        .context(BackendSnafu { stage: "trim-append-u1" })?;
    backend
        .generate_response(thread.id, "u1".to_string())
        .await
        .context(BackendSnafu { stage: "trim-generate-a1" })?;
    backend
        .add_message(thread.id, NewMessage::new(Role::User, "u2"))
        .await
        .context(BackendSnafu { stage: "trim-append-u2" })?;
    let a2 = backend
        .generate_response(thread.id, "u2".to_string())
        .await
        .context(BackendSnafu { stage: "trim-generate-a2" })?
        .expect("thread is live");

    let outcome = backend
        .trim_messages_from(thread.id, a2.id)
        .await
        .context(BackendSnafu { stage: "trim-apply" })?
        .expect("a user message precedes the target");
    check(
        "trim_regenerate",
        outcome.retained_user_content == "u2",
        "trim must return the retained user content",
    )?;

    // The caller immediately regenerates from the retained prompt.
    backend
        .generate_response(thread.id, outcome.retained_user_content)
        .await
        .context(BackendSnafu { stage: "trim-regenerate" })?;

    let messages = backend
        .list_messages(thread.id)
        .await
        .context(BackendSnafu { stage: "trim-list" })?;
    check(
        "trim_regenerate",
        messages.len() == 4 && messages[3].role == Role::Assistant,
        "regeneration must append a fresh assistant reply after the retained prompt",
    )
}

async fn run_new_chat_staging(store: Arc<ViewStateStore>) -> RunnerResult<()> {
    let scope = ScopeKey::new("history");
    let bus = BroadcastBus::new();
    let backend = MemoryBackend::new(LatencyProfile::Disabled);
    let signal = backend.take_activation_signal().expect("first taker");

    let selection = SelectionController::new(scope.clone(), Arc::clone(&store), bus.clone());
    let monitor = ActivationMonitor::new(scope.clone(), Arc::clone(&store), bus.clone());

    // An existing, already-listed conversation.
    let existing = backend
        .create_thread(Some("Existing".to_string()))
        .await
        .context(BackendSnafu { stage: "staging-create-existing" })?;
    backend
        .add_message(existing.id, NewMessage::new(Role::User, "warm-up"))
        .await
        .context(BackendSnafu { stage: "staging-activate-existing" })?;
    let mut activations = signal;
    let _ = activations.try_recv();

    // "New chat" flow: suppress, create, stage.
    selection.begin_new_chat();
    let draft = backend
        .create_thread(None)
        .await
        .context(BackendSnafu { stage: "staging-create-draft" })?;
    selection.stage_new_chat(draft.id);
    monitor.mark_temporary(draft.id, true);

    let listed = backend
        .list_threads()
        .await
        .context(BackendSnafu { stage: "staging-list-before" })?;
    check(
        "new_chat_staging",
        listed.iter().all(|thread| thread.id != draft.id),
        "a staged chat must stay out of the listing before its first message",
    )?;
    check(
        "new_chat_staging",
        selection.reconcile(&listed).is_none(),
        "suppression must hold auto-selection while the draft is invisible",
    )?;

    // First user message activates; the monitor clears suppression.
    backend
        .add_message(draft.id, NewMessage::new(Role::User, "hello there"))
        .await
        .context(BackendSnafu { stage: "staging-first-message" })?;
    let activated = activations.try_recv().ok();
    check(
        "new_chat_staging",
        activated == Some(draft.id),
        "activation signal must carry the draft thread id",
    )?;
    monitor.handle_activation(draft.id);

    let listed = backend
        .list_threads()
        .await
        .context(BackendSnafu { stage: "staging-list-after" })?;
    check(
        "new_chat_staging",
        selection.reconcile(&listed) == Some(draft.id),
        "reconciliation must resolve to the staged chat after activation",
    )
}

async fn run_selection_convergence(store: Arc<ViewStateStore>) -> RunnerResult<()> {
    let scope = ScopeKey::new("history");
    let bus = BroadcastBus::new();
    let backend = MemoryBackend::new(LatencyProfile::Disabled);
    let selection = SelectionController::new(scope.clone(), Arc::clone(&store), bus);

    for title in ["First", "Second"] {
        let thread = backend
            .create_thread(Some(title.to_string()))
            .await
            .context(BackendSnafu { stage: "convergence-create" })?;
        backend
            .add_message(thread.id, NewMessage::new(Role::User, title))
            .await
            .context(BackendSnafu { stage: "convergence-activate" })?;
    }
    let listed = backend
        .list_threads()
        .await
        .context(BackendSnafu { stage: "convergence-list" })?;

    // Stale persisted id: converge on the first listed thread.
    store
        .set_selected_id(&scope, Some(ThreadId::new_v7()))
        .context(SyncSnafu { stage: "convergence-store-stale" })?;
    let fallback = selection.reconcile(&listed);
    check(
        "selection_convergence",
        fallback == Some(listed[0].id),
        "a stale stored id must fall back to the first listed thread",
    )?;

    // Valid persisted id: republished unchanged, repeatedly.
    let kept = listed[1].id;
    store
        .set_selected_id(&scope, Some(kept))
        .context(SyncSnafu { stage: "convergence-store-valid" })?;
    for _ in 0..2 {
        check(
            "selection_convergence",
            selection.reconcile(&listed) == Some(kept),
            "a valid stored id must be reaffirmed unchanged",
        )?;
    }
    Ok(())
}

async fn run_title_precedence(store: Arc<ViewStateStore>) -> RunnerResult<()> {
    let scope = ScopeKey::new("history");
    let backend = MemoryBackend::new(LatencyProfile::Disabled);
    let thread = backend
        .create_thread(Some("Backend title".to_string()))
        .await
        .context(BackendSnafu { stage: "precedence-create" })?;

    let record = backend
        .get_by_id(thread.id)
        .await
        .context(BackendSnafu { stage: "precedence-get" })?
        .expect("thread just created");

    // First sight back-fills the overlay from the backend title.
    check(
        "title_precedence",
        store.display_title(&scope, &record) == "Backend title",
        "an unseen thread must display its backend title",
    )?;

    // Once the overlay disagrees, the overlay wins.
    store
        .set_title_overlay(&scope, thread.id, "Local rename")
        .context(SyncSnafu { stage: "precedence-overlay" })?;
    backend
        .update_title(thread.id, "Backend rename".to_string())
        .await
        .context(BackendSnafu { stage: "precedence-backend-rename" })?;
    let record = backend
        .get_by_id(thread.id)
        .await
        .context(BackendSnafu { stage: "precedence-reget" })?
        .expect("thread still live");

    check(
        "title_precedence",
        store.display_title(&scope, &record) == "Local rename",
        "the persisted title map must win over the backend title",
    )
}

async fn run_title_echo_guard(store: Arc<ViewStateStore>) -> RunnerResult<()> {
    let scope = ScopeKey::new("history");
    let bus = BroadcastBus::new();
    let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new(LatencyProfile::Disabled));
    let thread = backend
        .create_thread(None)
        .await
        .context(BackendSnafu { stage: "echo-create" })?;
    backend
        .add_message(thread.id, NewMessage::new(Role::User, "hi"))
        .await
        .context(BackendSnafu { stage: "echo-activate" })?;

    let sidebar = TitleEditController::new(
        scope.clone(),
        SurfaceTag::new("sidebar"),
        Arc::clone(&store),
        backend.clone() as Arc<dyn ChatBackend>,
        bus.clone(),
    );
    let conversation = Arc::new(TitleEditController::new(
        scope.clone(),
        SurfaceTag::new("conversation"),
        Arc::clone(&store),
        backend as Arc<dyn ChatBackend>,
        bus.clone(),
    ));

    let mirrored = Arc::new(Mutex::new(Vec::new()));
    let mirror_sink = Arc::clone(&mirrored);
    let mirror_controller = Arc::clone(&conversation);
    let _subscription = bus.subscribe(move |event| {
        if let Some((_, draft)) = mirror_controller.mirror(event) {
            mirror_sink.lock().unwrap().push(draft);
        }
    });

    check(
        "title_echo_guard",
        sidebar.begin(thread.id).await.is_some(),
        "the edit session must open against a live thread",
    )?;
    sidebar.input("Renam");
    sidebar.input("Renamed");
    let committed = sidebar.commit().await;

    check(
        "title_echo_guard",
        committed.as_deref() == Some("Renamed"),
        "the sidebar commit must persist its draft",
    )?;
    check(
        "title_echo_guard",
        *mirrored.lock().unwrap() == vec!["Renam".to_string(), "Renamed".to_string()],
        "the conversation surface must mirror remote drafts",
    )?;

    // The originating surface never mirrors its own echo.
    let own_echo = BusEvent::TitleTyping {
        scope,
        thread_id: thread.id,
        draft: "echo".to_string(),
        source: SurfaceTag::new("sidebar"),
    };
    check(
        "title_echo_guard",
        sidebar.mirror(&own_echo).is_none(),
        "a surface must ignore its own echoed draft",
    )
}

fn run_folder_guards(store: Arc<ViewStateStore>) -> RunnerResult<()> {
    let manager = FolderManager::new(store);

    check(
        "folder_guards",
        manager.delete(&FolderId::reserved()).is_err(),
        "deleting the reserved folder must be rejected",
    )?;
    check(
        "folder_guards",
        manager.rename(&FolderId::reserved(), "Archive").is_err(),
        "renaming the reserved folder must be rejected",
    )?;

    let work = manager.create("Work").context(SyncSnafu { stage: "guards-create" })?;
    let first = ThreadId::new_v7();
    let second = ThreadId::new_v7();
    manager
        .move_thread(first, Some(&work.id))
        .context(SyncSnafu { stage: "guards-move-first" })?;
    manager
        .move_thread(second, Some(&work.id))
        .context(SyncSnafu { stage: "guards-move-second" })?;

    manager.delete(&work.id).context(SyncSnafu { stage: "guards-delete" })?;
    let folders = manager.folders();
    let reserved = &folders[0];
    check(
        "folder_guards",
        !folders.iter().any(|folder| folder.id == work.id)
            && reserved.chat_ids.contains(&first)
            && reserved.chat_ids.contains(&second),
        "deleting a folder must migrate its members into the reserved folder",
    )
}

fn run_folder_exclusivity(store: Arc<ViewStateStore>) -> RunnerResult<()> {
    let manager = FolderManager::new(store);
    let work = manager
        .create("Work")
        .context(SyncSnafu { stage: "exclusivity-create-work" })?;
    let personal = manager
        .create("Personal")
        .context(SyncSnafu { stage: "exclusivity-create-personal" })?;

    let thread = ThreadId::new_v7();
    let moves: [Option<&FolderId>; 4] = [Some(&work.id), Some(&personal.id), Some(&personal.id), None];
    for target in moves {
        manager
            .move_thread(thread, target)
            .context(SyncSnafu { stage: "exclusivity-move" })?;
        let owners = manager
            .folders()
            .iter()
            .filter(|folder| folder.chat_ids.contains(&thread))
            .count();
        check(
            "folder_exclusivity",
            owners == 1,
            "a thread id must appear in exactly one folder after every move",
        )?;
    }

    // Display-order drops never touch membership.
    let other = ThreadId::new_v7();
    manager
        .move_thread(other, None)
        .context(SyncSnafu { stage: "exclusivity-move-other" })?;
    let mut display = vec![thread, other];
    manager
        .handle_drop(other, DropTarget::Thread(thread), &mut display)
        .context(SyncSnafu { stage: "exclusivity-reorder" })?;
    check(
        "folder_exclusivity",
        display == vec![other, thread],
        "dropping on a thread row must reorder the display list",
    )?;
    check(
        "folder_exclusivity",
        manager.folder_of(other) == Some(FolderId::reserved()),
        "display reordering must leave membership unchanged",
    )
}
