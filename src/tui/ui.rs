use ratatui::{prelude::*, widgets::*};

use crate::tui::app::{App, PromptKind};

const ACCENT: Color = Color::Rgb(0, 150, 0);

pub fn render_ui(f: &mut Frame, app: &App) {
    let area = f.area();
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // title
            Constraint::Min(3),    // console
            Constraint::Length(3), // input
            Constraint::Length(2), // status + help
        ])
        .split(area);

    render_title(f, app, main_chunks[0]);
    render_console(f, app, main_chunks[1]);
    render_input(f, app, main_chunks[2]);
    render_status(f, app, main_chunks[3]);

    if app.prompt.is_some() {
        render_prompt(f, app, area);
    }
}

fn render_title(f: &mut Frame, app: &App, area: Rect) {
    let state = if app.port_open { "OPEN" } else { "CLOSED" };
    let mut spans = vec![
        Span::styled(
            format!(" serterm  {}  [{state}] ", app.config.serial.description()),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
    ];
    for (name, on) in app.pinout.states() {
        let style = if on {
            Style::default().fg(Color::Black).bg(ACCENT)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(format!(" {name} "), style));
        spans.push(Span::raw(" "));
    }
    let flags = [
        (app.config.console.hex_view, "HEX"),
        (app.config.console.timestamp_view, "TS"),
        (!app.console.is_update_enabled(), "FROZEN"),
        (app.config.auto_log.enabled, "LOG"),
        (app.config.console.local_echo, "ECHO"),
    ];
    for (_, flag) in flags.iter().filter(|(on, _)| *on) {
        spans.push(Span::styled(
            format!("[{flag}] "),
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Control bytes would be interpreted by the terminal; show them as dots.
fn printable(line: &str) -> String {
    line.chars()
        .map(|ch| if ch.is_control() { '.' } else { ch })
        .collect()
}

fn render_console(f: &mut Frame, app: &App, area: Rect) {
    let height = usize::from(area.height.saturating_sub(2));
    let view = app.console.view();
    let end = view.line_count().saturating_sub(app.scroll);
    let start = end.saturating_sub(height);
    let lines: Vec<Line> = view
        .lines()
        .skip(start)
        .take(end - start)
        .map(|line| Line::raw(printable(line)))
        .collect();

    let mut title = format!(
        " Received  Rx: {} ",
        app.config.console.line_ending_rx
    );
    if app.scroll > 0 {
        title.push_str(&format!("(scrolled {}) ", app.scroll));
    }
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Plain);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let title = if app.direct_typing {
        " Direct typing (Ctrl+Y to leave) ".to_string()
    } else {
        let ending = if app.config.transmit.append_line_ending {
            app.config.console.line_ending_tx.to_string()
        } else {
            "no line ending".to_string()
        };
        format!(" Send [{}]  Tx: {ending} ", app.input.mode())
    };
    let mut block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Plain);
    if app.prompt.is_none() {
        block = block.style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD));
    }
    let text = if app.direct_typing {
        String::new()
    } else {
        format!("{}_", app.input.text())
    };
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(area);

    if let Some((text, percent)) = &app.progress {
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(ACCENT))
            .ratio(f64::from(percent.clamp(0.0, 100.0)) / 100.0)
            .label(text.clone());
        f.render_widget(gauge, rows[0]);
    } else if let Some(error) = &app.error {
        let error = Paragraph::new(format!(" {error}"))
            .style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD));
        f.render_widget(error, rows[0]);
    } else {
        f.render_widget(Paragraph::new(format!(" {}", app.status)), rows[0]);
    }

    let help = Paragraph::new(
        "^O open/close  ^E hex  ^T time  ^F freeze  ^L clear  ^D DTR  ^R RTS  ^K abort  \
         ^G log  ^P port  ^B baud  ^U send file  ^W save  Tab mode  F1-F6 texts  ^Q quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    f.render_widget(help, rows[1]);
}

fn render_prompt(f: &mut Frame, app: &App, area: Rect) {
    let Some(prompt) = &app.prompt else {
        return;
    };
    let mut lines = vec![Line::raw(format!("{}_", prompt.buffer))];
    if prompt.kind == PromptKind::PortName {
        lines.push(Line::raw(""));
        if app.ports.is_empty() {
            lines.push(Line::styled("no ports found", Style::default().fg(Color::DarkGray)));
        }
        lines.extend(app.ports.iter().map(|port| Line::raw(port.label())));
    }

    let height = (lines.len() as u16 + 2).min(area.height);
    let width = (area.width * 3 / 5).max(20).min(area.width);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };
    let block = Block::default()
        .title(format!(" {} (Enter to apply, Esc to cancel) ", prompt.kind.label()))
        .borders(Borders::ALL)
        .style(Style::default().fg(ACCENT));
    f.render_widget(Clear, popup);
    f.render_widget(Paragraph::new(lines).block(block), popup);
}
