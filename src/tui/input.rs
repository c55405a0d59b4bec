use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Everything a key press can ask the terminal to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Insert(char),
    DeleteChar,
    Submit,
    Cancel,
    HistoryPrev,
    HistoryNext,
    ScrollUp,
    ScrollDown,
    CycleSendMode,
    TogglePort,
    ToggleHexView,
    ToggleTimestampView,
    ToggleFreeze,
    ClearConsole,
    ToggleDtr,
    ToggleRts,
    AbortSend,
    ToggleAutoLog,
    ToggleDirectTyping,
    ToggleLocalEcho,
    ToggleAppendLineEnding,
    CycleRxLineEnding,
    CycleTxLineEnding,
    PromptPortName,
    PromptBaudRate,
    PromptSendFile,
    PromptSaveCapture,
    CustomText(usize),
    None,
}

pub fn map_key(key: KeyEvent) -> Action {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') | KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('o') => Action::TogglePort,
            KeyCode::Char('e') => Action::ToggleHexView,
            KeyCode::Char('t') => Action::ToggleTimestampView,
            KeyCode::Char('f') => Action::ToggleFreeze,
            KeyCode::Char('l') => Action::ClearConsole,
            KeyCode::Char('d') => Action::ToggleDtr,
            KeyCode::Char('r') => Action::ToggleRts,
            KeyCode::Char('k') => Action::AbortSend,
            KeyCode::Char('g') => Action::ToggleAutoLog,
            KeyCode::Char('y') => Action::ToggleDirectTyping,
            KeyCode::Char('p') => Action::PromptPortName,
            KeyCode::Char('b') => Action::PromptBaudRate,
            KeyCode::Char('u') => Action::PromptSendFile,
            KeyCode::Char('w') => Action::PromptSaveCapture,
            _ => Action::None,
        };
    }

    match key.code {
        KeyCode::Char(c) => Action::Insert(c),
        KeyCode::Backspace => Action::DeleteChar,
        KeyCode::Enter => Action::Submit,
        KeyCode::Esc => Action::Cancel,
        KeyCode::Up => Action::HistoryPrev,
        KeyCode::Down => Action::HistoryNext,
        KeyCode::PageUp => Action::ScrollUp,
        KeyCode::PageDown => Action::ScrollDown,
        KeyCode::Tab => Action::CycleSendMode,
        KeyCode::F(n @ 1..=6) => Action::CustomText(usize::from(n - 1)),
        KeyCode::F(7) => Action::CycleRxLineEnding,
        KeyCode::F(8) => Action::CycleTxLineEnding,
        KeyCode::F(9) => Action::ToggleLocalEcho,
        KeyCode::F(10) => Action::ToggleAppendLineEnding,
        _ => Action::None,
    }
}
