#![warn(missing_docs)]
//! # oab-kiosk binary
//!
//! Console kiosk shell: reads line commands from stdin, renders the overlay
//! and notifications on stdout, and exits only after the exit gate approves.
//! Closing stdin leaves the kiosk running.

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use oab_kiosk_app::{
    AppConfig, AppError, CONSOLE_HELP, ConsoleCommand, ExitSignal, SessionController,
    app_version, build_controller, init_logging, run_console,
};
use oab_kiosk_ui::{
    Notifier, OverlayView, Presentation, PresentationBridge, SessionEndReason,
    SessionStartPayload, UiState, UserMessage, format_remaining,
};
use tokio::io::BufReader;
use tracing::{error, info};

/// CLI entry point.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(stage = "app", action = "fatal", error = %error);
            eprintln!("oab-kiosk: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let log_path = init_logging(&config.log_dir, &config.log_filter)?;
    println!("oab-kiosk {} (log: {})", app_version(), log_path.display());

    let shell = Arc::new(ConsoleShell::new());
    let controller = build_controller(&config, shell.clone(), shell.clone())?;
    controller.discard_stale_session()?;
    info!(stage = "app", action = "started", api_url = %config.api_url);

    tokio::spawn(render_overlay(controller.clone(), shell.clone()));

    println!("{CONSOLE_HELP}");
    let exit = shell.exit_signal();
    let input = BufReader::new(tokio::io::stdin());
    let (controller, shell): (&SessionController, &ConsoleShell) = (&controller, &*shell);
    run_console(input, &exit, move |command| async move {
        match command {
            Ok(command) => execute(controller, shell, command).await,
            Err(error) => println!("{error}. {CONSOLE_HELP}"),
        }
    })
    .await?;
    Ok(())
}

async fn execute(controller: &SessionController, shell: &ConsoleShell, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Config {
            station_id,
            supervisor_id,
        } => match controller.update_config(station_id, supervisor_id) {
            Ok(saved) => println!(
                "config saved: station={} supervisor={}",
                saved.station_id, saved.supervisor_id
            ),
            Err(error) => println!("config rejected: {error}"),
        },
        ConsoleCommand::Login(credentials) => {
            if let Err(error) = controller.login(&credentials).await {
                shell.present(&error.user_message());
            }
        }
        ConsoleCommand::Logout => {
            if !controller.logout().await {
                println!("no active session");
            }
        }
        ConsoleCommand::Status => {
            let overlay = controller.overlay();
            println!(
                "state={} authenticated={} overlay={} {} {}",
                controller.state(),
                controller.is_authenticated(),
                overlay.active,
                overlay.name,
                overlay.remaining
            );
        }
        ConsoleCommand::Exit(password) => {
            if let Err(error) = controller.request_exit(&password).await {
                shell.present(&UserMessage::from_elevation_error(&error));
            }
        }
        ConsoleCommand::Help => println!("{CONSOLE_HELP}"),
    }
}

async fn render_overlay(controller: SessionController, shell: Arc<ConsoleShell>) {
    let mut remaining = controller.subscribe_remaining();
    while remaining.changed().await.is_ok() {
        let seconds = *remaining.borrow_and_update();
        let overlay = shell.update_timer(&controller);
        // Redraw once a minute, then every second for the final minute.
        if overlay.active && (seconds % 60 == 0 || seconds <= 60) {
            print!("\r[{}] {} ", overlay.remaining, overlay.name);
            let _ = std::io::stdout().flush();
        }
    }
}

/// Stdout-backed notifier and window bridge.
struct ConsoleShell {
    ui: Mutex<UiState>,
    exit: ExitSignal,
}

impl ConsoleShell {
    fn new() -> Self {
        Self {
            ui: Mutex::new(UiState::new(app_version())),
            exit: ExitSignal::new(),
        }
    }

    fn exit_signal(&self) -> ExitSignal {
        self.exit.clone()
    }

    fn update_timer(&self, controller: &SessionController) -> OverlayView {
        let timer = controller.timer_state();
        let mut ui = self.ui.lock().unwrap_or_else(PoisonError::into_inner);
        ui.apply_timer(&timer);
        ui.overlay.clone()
    }

    fn present(&self, message: &UserMessage) {
        match message.presentation {
            Presentation::Inline => println!("{}", message.body),
            Presentation::Blocking => println!("\n*** {} ***\n{}", message.title, message.body),
        }
    }
}

#[async_trait]
impl Notifier for ConsoleShell {
    async fn notify(&self, message: UserMessage) {
        println!("\n[notification] {}: {}", message.title, message.body);
    }
}

impl PresentationBridge for ConsoleShell {
    fn on_login_succeeded(&self, payload: SessionStartPayload) {
        println!(
            "session started for {} ({}): {}",
            payload.user_name,
            payload.oab_number,
            format_remaining(payload.total_seconds)
        );
        self.ui
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_login(payload);
    }

    fn on_session_ended(&self, reason: SessionEndReason) {
        let alert = {
            let mut ui = self.ui.lock().unwrap_or_else(PoisonError::into_inner);
            ui.apply_session_ended(reason);
            ui.take_message()
        };
        println!("\nsession ended ({reason:?}); back to login");
        if let Some(alert) = alert {
            self.present(&alert);
        }
    }

    fn on_exit_approved(&self) {
        println!("exit approved");
        self.exit.approve();
    }
}
