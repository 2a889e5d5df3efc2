use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use wisp_storage::{
    ChatBackend, MemoryBackend, NewMessage, Role, ThreadRecord,
};
use wisp_sync::{
    ActivationMonitor, BroadcastBus, BusEvent, DropTarget, FolderManager, ScopeKey,
    SelectionController, Subscription, SurfaceTag, TitleEditController, VIEW_STATE_FILE_NAME,
    ViewStateStore,
};

use crate::config::ShellSettings;

const PANEL_TAB: &str = "chats";

/// Headless stand-in for the presentational screens: one command loop acting
/// as both the thread-list panel and the conversation view.
///
/// Everything it does goes through the same boundary the real screens use
/// (the broadcast bus plus the backend API), so watching its event log is
/// watching the synchronization core converge.
pub struct ShellApp {
    scope: ScopeKey,
    backend: Arc<MemoryBackend>,
    store: Arc<ViewStateStore>,
    bus: BroadcastBus,
    selection: Arc<SelectionController>,
    title_edit: TitleEditController,
    folders: FolderManager,
    monitor: ActivationMonitor,
    listing: Vec<ThreadRecord>,
    _event_log: Subscription,
    _select_relay: Subscription,
    _panel_relay: Subscription,
}

impl ShellApp {
    pub fn new(settings: &ShellSettings) -> Self {
        let scope = ScopeKey::new(settings.scope_key.clone());
        let surface = SurfaceTag::new(settings.surface_tag.clone());

        let backend = Arc::new(MemoryBackend::new(settings.latency_profile()));
        let store = Arc::new(ViewStateStore::open(
            settings.resolved_data_dir().join(VIEW_STATE_FILE_NAME),
        ));
        let bus = BroadcastBus::new();

        let event_log = bus.subscribe(|event| println!("  [bus] {}", describe(event)));

        let selection = Arc::new(SelectionController::new(
            scope.clone(),
            Arc::clone(&store),
            bus.clone(),
        ));
        let relay_selection = Arc::clone(&selection);
        let select_relay = bus.subscribe(move |event| relay_selection.handle_event(event));

        // Panel requests are answered here: flip the persisted flag, then
        // report the resulting state back over the bus.
        let panel_scope = scope.clone();
        let panel_store = Arc::clone(&store);
        let panel_bus = bus.clone();
        let panel_relay = bus.subscribe(move |event| {
            if let BusEvent::PanelToggleRequested { scope, tab } = event
                && *scope == panel_scope
            {
                let is_open = !panel_store.panel_open(&panel_scope);
                if let Err(error) = panel_store.set_panel_open(&panel_scope, is_open) {
                    tracing::warn!("failed to persist panel state: {error}");
                }
                panel_bus.publish(&BusEvent::PanelStateChanged {
                    scope: panel_scope.clone(),
                    tab: tab.clone(),
                    is_open,
                });
            }
        });

        let title_edit = TitleEditController::new(
            scope.clone(),
            surface,
            Arc::clone(&store),
            Arc::clone(&backend) as Arc<dyn ChatBackend>,
            bus.clone(),
        );
        let folders = FolderManager::new(Arc::clone(&store));

        let monitor = ActivationMonitor::new(scope.clone(), Arc::clone(&store), bus.clone());
        let signal = backend
            .take_activation_signal()
            .expect("activation signal taken before any other consumer");
        // Detached on purpose: the monitor runs for the life of the process.
        let _activation_task = monitor.clone().spawn(signal);

        Self {
            scope,
            backend,
            store,
            bus,
            selection,
            title_edit,
            folders,
            monitor,
            listing: Vec::new(),
            _event_log: event_log,
            _select_relay: select_relay,
            _panel_relay: panel_relay,
        }
    }

    pub async fn run(&mut self) -> std::io::Result<()> {
        println!("wisp shell; type `help` for commands");
        self.refresh().await;
        self.cmd_list();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (command, rest) = match line.split_once(char::is_whitespace) {
                Some((command, rest)) => (command, rest.trim()),
                None => (line, ""),
            };

            match command {
                "help" => print_help(),
                "list" => {
                    self.refresh().await;
                    self.cmd_list();
                }
                "new" => self.cmd_new().await,
                "send" => self.cmd_send(rest).await,
                "open" => self.cmd_open().await,
                "select" => self.cmd_select(rest),
                "title" => self.cmd_title(rest).await,
                "search" => self.cmd_search(rest).await,
                "stats" => self.cmd_stats().await,
                "regen" => self.cmd_regen().await,
                "folders" => self.cmd_folders(),
                "folder" => self.cmd_folder(rest),
                "rm" => self.cmd_rm().await,
                "panel" => self.cmd_panel(),
                "quit" | "exit" => break,
                _ => println!("unknown command '{command}'; type `help`"),
            }
        }
        Ok(())
    }

    /// Refreshes the cached listing, files any unfiled threads, and lets the
    /// selection controller reconcile against the new list.
    async fn refresh(&mut self) {
        match self.backend.list_threads().await {
            Ok(listing) => {
                if let Err(error) = self.folders.adopt_unfiled(&listing) {
                    tracing::warn!("failed to file new threads: {error}");
                }
                self.selection.reconcile(&listing);
                self.listing = listing;
            }
            Err(error) => {
                tracing::warn!("thread listing failed, keeping previous list: {error}");
            }
        }
    }

    fn cmd_list(&self) {
        if self.listing.is_empty() {
            println!("no conversations yet; `new` starts one");
            return;
        }

        let selected = self.store.selected_id(&self.scope);
        let folders = self.folders.folders();
        for (index, thread) in self.listing.iter().enumerate() {
            let marker = if selected == Some(thread.id) { "*" } else { " " };
            let pin = if thread.pinned { " [pinned]" } else { "" };
            let folder = folders
                .iter()
                .find(|folder| folder.chat_ids.contains(&thread.id))
                .map(|folder| folder.name.as_str())
                .unwrap_or_default();
            println!(
                "{marker} {:>2}. {}  ({folder}, {} chars / {} tokens){pin}",
                index + 1,
                self.store.display_title(&self.scope, thread),
                thread.size_chars,
                thread.size_tokens,
            );
        }
    }

    async fn cmd_new(&mut self) {
        self.selection.begin_new_chat();
        match self.backend.create_thread(None).await {
            Ok(thread) => {
                self.selection.stage_new_chat(thread.id);
                self.monitor.mark_temporary(thread.id, true);
                self.bus.publish(&BusEvent::ThreadCreated { thread });
                println!("new chat staged; it stays hidden until your first message");
            }
            Err(error) => {
                tracing::warn!("create_thread failed: {error}");
                println!("could not start a new chat");
            }
        }
    }

    async fn cmd_send(&mut self, text: &str) {
        if text.is_empty() {
            println!("usage: send <message>");
            return;
        }
        let Some(thread_id) = self.store.selected_id(&self.scope) else {
            println!("no chat selected; `new` or `select <n>` first");
            return;
        };

        match self
            .backend
            .add_message(thread_id, NewMessage::new(Role::User, text))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                println!("that chat is gone; pick another");
                return;
            }
            Err(error) => {
                tracing::warn!("add_message failed: {error}");
                return;
            }
        }

        match self
            .backend
            .generate_response(thread_id, text.to_string())
            .await
        {
            Ok(Some(reply)) => println!("assistant: {}", reply.content),
            Ok(None) => println!("that chat is gone; pick another"),
            Err(error) => tracing::warn!("generate_response failed: {error}"),
        }

        self.refresh().await;
    }

    async fn cmd_open(&self) {
        let Some(thread_id) = self.store.selected_id(&self.scope) else {
            println!("no chat selected");
            return;
        };
        match self.backend.list_messages(thread_id).await {
            Ok(messages) if messages.is_empty() => println!("(empty conversation)"),
            Ok(messages) => {
                for message in messages {
                    let truncated = if message.truncated { " …" } else { "" };
                    println!("{:>9}: {}{truncated}", message.role.as_str(), message.content);
                }
            }
            Err(error) => tracing::warn!("list_messages failed: {error}"),
        }
    }

    fn cmd_select(&self, arg: &str) {
        let Some(thread) = self.resolve_thread_index(arg) else {
            println!("usage: select <n> (see `list`)");
            return;
        };
        // Route through the bus like any other surface would.
        self.bus.publish(&BusEvent::SelectRequested {
            scope: self.scope.clone(),
            thread_id: thread.id,
        });
    }

    async fn cmd_title(&self, text: &str) {
        if text.is_empty() {
            println!("usage: title <new title>");
            return;
        }
        let Some(thread_id) = self.store.selected_id(&self.scope) else {
            println!("no chat selected");
            return;
        };

        if self.title_edit.begin(thread_id).await.is_none() {
            println!("that chat is gone");
            return;
        }
        self.title_edit.input(text);
        match self.title_edit.commit().await {
            Some(title) => println!("renamed to '{title}'"),
            None => println!("title unchanged"),
        }
    }

    async fn cmd_search(&self, query: &str) {
        if query.is_empty() {
            println!("usage: search <text>");
            return;
        }
        match self.backend.search_messages(query.to_string()).await {
            Ok(hits) if hits.is_empty() => println!("no matches"),
            Ok(hits) => {
                for hit in hits {
                    println!("[{}] {}: {}", hit.thread_title, hit.role.as_str(), hit.content);
                }
            }
            Err(error) => tracing::warn!("search failed: {error}"),
        }
    }

    async fn cmd_stats(&self) {
        let Some(thread_id) = self.store.selected_id(&self.scope) else {
            println!("no chat selected");
            return;
        };
        match self.backend.thread_stats(thread_id).await {
            Ok(Some(stats)) => println!(
                "{} messages ({} user / {} assistant), {} chars, {} tokens",
                stats.message_count,
                stats.user_messages,
                stats.assistant_messages,
                stats.size_chars,
                stats.size_tokens,
            ),
            Ok(None) => println!("that chat is gone"),
            Err(error) => tracing::warn!("thread_stats failed: {error}"),
        }
    }

    /// Regenerate the last assistant reply: trim back to the prompting user
    /// message, then ask for a fresh response to the retained content.
    async fn cmd_regen(&mut self) {
        let Some(thread_id) = self.store.selected_id(&self.scope) else {
            println!("no chat selected");
            return;
        };

        let last_assistant = match self.backend.list_messages(thread_id).await {
            Ok(messages) => messages
                .into_iter()
                .rev()
                .find(|message| message.role == Role::Assistant),
            Err(error) => {
                tracing::warn!("list_messages failed: {error}");
                return;
            }
        };
        let Some(target) = last_assistant else {
            println!("nothing to regenerate yet");
            return;
        };

        let outcome = match self.backend.trim_messages_from(thread_id, target.id).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                println!("nothing to regenerate yet");
                return;
            }
            Err(error) => {
                tracing::warn!("trim failed: {error}");
                return;
            }
        };

        match self
            .backend
            .generate_response(thread_id, outcome.retained_user_content)
            .await
        {
            Ok(Some(reply)) => println!("assistant: {}", reply.content),
            Ok(None) => println!("that chat is gone"),
            Err(error) => tracing::warn!("generate_response failed: {error}"),
        }
        self.refresh().await;
    }

    fn cmd_folders(&self) {
        for (index, folder) in self.folders.folders().iter().enumerate() {
            println!(
                "{:>2}. {}  ({} chats)",
                index + 1,
                folder.name,
                folder.chat_ids.len()
            );
        }
    }

    fn cmd_folder(&self, rest: &str) {
        let (action, rest) = match rest.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (rest, ""),
        };

        let outcome = match action {
            "new" => self.folders.create(rest).map(|folder| {
                println!("created folder '{}'", folder.name);
            }),
            "rename" => match rest.split_once(char::is_whitespace) {
                Some((index, name)) => match self.resolve_folder_index(index) {
                    Some(folder) => self.folders.rename(&folder.id, name.trim()),
                    None => {
                        println!("usage: folder rename <n> <name>");
                        return;
                    }
                },
                None => {
                    println!("usage: folder rename <n> <name>");
                    return;
                }
            },
            "rm" => match self.resolve_folder_index(rest) {
                Some(folder) => self.folders.delete(&folder.id),
                None => {
                    println!("usage: folder rm <n>");
                    return;
                }
            },
            "mv" => match rest.split_once(char::is_whitespace) {
                Some((thread_index, folder_index)) => {
                    let Some(thread) = self.resolve_thread_index(thread_index) else {
                        println!("usage: folder mv <chat n> <folder n>");
                        return;
                    };
                    let Some(folder) = self.resolve_folder_index(folder_index.trim()) else {
                        println!("usage: folder mv <chat n> <folder n>");
                        return;
                    };
                    // A drop onto a folder target is a membership move.
                    let mut display: Vec<_> =
                        self.listing.iter().map(|thread| thread.id).collect();
                    self.folders
                        .handle_drop(thread.id, DropTarget::Folder(folder.id), &mut display)
                }
                None => {
                    println!("usage: folder mv <chat n> <folder n>");
                    return;
                }
            },
            _ => {
                println!("usage: folder new|rename|rm|mv …");
                return;
            }
        };

        if let Err(error) = outcome {
            // Validation failures surface as messages, never as crashes.
            println!("{error}");
        }
    }

    async fn cmd_rm(&mut self) {
        let Some(thread_id) = self.store.selected_id(&self.scope) else {
            println!("no chat selected");
            return;
        };
        if let Err(error) = self.backend.delete_thread(thread_id).await {
            tracing::warn!("delete_thread failed: {error}");
            return;
        }
        println!("deleted");
        self.refresh().await;
        self.cmd_list();
    }

    fn cmd_panel(&self) {
        self.bus.publish(&BusEvent::PanelToggleRequested {
            scope: self.scope.clone(),
            tab: PANEL_TAB.to_string(),
        });
        println!(
            "history panel is now {}",
            if self.store.panel_open(&self.scope) {
                "open"
            } else {
                "closed"
            }
        );
    }

    fn resolve_thread_index(&self, raw: &str) -> Option<&ThreadRecord> {
        let index: usize = raw.trim().parse().ok()?;
        self.listing.get(index.checked_sub(1)?)
    }

    fn resolve_folder_index(&self, raw: &str) -> Option<wisp_sync::FolderRecord> {
        let index: usize = raw.trim().parse().ok()?;
        self.folders.folders().into_iter().nth(index.checked_sub(1)?)
    }
}

fn describe(event: &BusEvent) -> String {
    match event {
        BusEvent::SelectionChanged { scope, thread_id } => {
            format!("{} {scope}:{thread_id}", event.wire_name())
        }
        BusEvent::TitleTyping { draft, source, .. } => {
            format!("{} '{draft}' from {source}", event.wire_name())
        }
        BusEvent::TitleCommitted { title, .. } => {
            format!("{} '{title}'", event.wire_name())
        }
        BusEvent::TempToggled {
            thread_id,
            is_temporary,
            ..
        } => format!("{} {thread_id} -> {is_temporary}", event.wire_name()),
        BusEvent::ThreadActivated { thread_id } => {
            format!("{} {thread_id}", event.wire_name())
        }
        BusEvent::ThreadCreated { thread } => {
            format!("{} '{}'", event.wire_name(), thread.title)
        }
        BusEvent::SelectionCleared { scope } => format!("{} {scope}", event.wire_name()),
        BusEvent::SelectRequested { thread_id, .. } => {
            format!("{} {thread_id}", event.wire_name())
        }
        BusEvent::PanelToggleRequested { tab, .. } => {
            format!("{} {tab}", event.wire_name())
        }
        BusEvent::PanelStateChanged { tab, is_open, .. } => {
            format!("{} {tab} -> {is_open}", event.wire_name())
        }
    }
}

fn print_help() {
    println!(
        "commands:\n\
         \x20 list                      refresh and show the conversation list\n\
         \x20 new                       stage a new (hidden) chat\n\
         \x20 send <text>               send a message in the selected chat\n\
         \x20 open                      show the selected conversation\n\
         \x20 select <n>                select a listed chat\n\
         \x20 title <text>              rename the selected chat\n\
         \x20 search <text>             search all messages\n\
         \x20 stats                     show aggregates for the selected chat\n\
         \x20 regen                     regenerate the last assistant reply\n\
         \x20 folders                   list folders\n\
         \x20 folder new <name>         create a folder\n\
         \x20 folder rename <n> <name>  rename a folder\n\
         \x20 folder rm <n>             delete a folder (members go to General)\n\
         \x20 folder mv <chat> <folder> move a chat into a folder\n\
         \x20 rm                        delete the selected chat\n\
         \x20 panel                     toggle the history panel flag\n\
         \x20 quit"
    );
}
