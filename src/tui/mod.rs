pub mod app;
pub mod input;
pub mod ui;

use anyhow::Result;
use ratatui::{backend::CrosstermBackend, prelude::*};
use std::{
    io::{self, Stdout},
    path::PathBuf,
    time::Duration,
};

use crate::{
    core::config::{self, AppConfig},
    protocol::transport::TransportFactory,
    tui::input::{map_key, Action},
};
use app::App;

/// Input poll interval; also bounds how long received data waits to be shown.
const FRAME_INTERVAL: Duration = Duration::from_millis(30);

pub fn start<F>(factory: F, config: AppConfig, config_path: PathBuf) -> Result<()>
where
    F: TransportFactory + 'static,
{
    log::info!("[TUI] serterm starting on {}", config.serial.description());

    let mut app = App::new(factory, config)?;

    let mut stdout = io::stdout();
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(&mut stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    let mut stdout = io::stdout();
    crossterm::execute!(stdout, crossterm::terminal::LeaveAlternateScreen)?;
    crossterm::terminal::disable_raw_mode()?;

    let config = app.shutdown();
    if let Err(err) = config::save(&config, &config_path) {
        log::error!("failed to save config: {err:#}");
    }
    res
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<&mut Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.pump();
        terminal.draw(|f| ui::render_ui(f, app))?;

        if crossterm::event::poll(FRAME_INTERVAL)? {
            let evt = match crossterm::event::read() {
                Ok(e) => e,
                Err(e) => {
                    app.error = Some(format!("input read error: {e}"));
                    continue;
                }
            };

            if let crossterm::event::Event::Key(key) = evt {
                // Only the initial press; repeats and releases would double
                // every keystroke on terminals that report them.
                if key.kind != crossterm::event::KeyEventKind::Press {
                    continue;
                }
                match map_key(key) {
                    Action::None => {}
                    action => app.handle(action),
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    terminal.clear()?;
    Ok(())
}
