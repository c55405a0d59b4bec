use std::collections::VecDeque;

/// The rendered console text, kept as lines. The last line is the one being
/// written to and may be empty.
#[derive(Debug, Clone)]
pub struct ConsoleView {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl Default for ConsoleView {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConsoleView {
    /// `max_lines` of 0 keeps every line.
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::from([String::new()]),
            max_lines,
        }
    }

    pub fn set_max_lines(&mut self, max_lines: usize) {
        self.max_lines = max_lines;
        self.enforce_limit();
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.lines.push_back(String::new());
    }

    pub fn push_char(&mut self, ch: char) {
        if ch == '\n' {
            self.lines.push_back(String::new());
            self.enforce_limit();
        } else if let Some(last) = self.lines.back_mut() {
            last.push(ch);
        }
    }

    pub fn push_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.push_char(ch);
        }
    }

    /// Delete the character before the cursor, joining lines when the
    /// current line is empty.
    pub fn delete_previous_char(&mut self) {
        let current_empty = self.lines.back().is_some_and(String::is_empty);
        if current_empty && self.lines.len() > 1 {
            self.lines.pop_back();
        } else if let Some(last) = self.lines.back_mut() {
            last.pop();
        }
    }

    /// Remove the newest complete-or-partial line so it can be rendered again.
    pub fn remove_last_line(&mut self) {
        if self.lines.back().is_some_and(String::is_empty) && self.lines.len() > 1 {
            self.lines.pop_back();
        }
        if let Some(last) = self.lines.back_mut() {
            last.clear();
        }
    }

    fn enforce_limit(&mut self) {
        if self.max_lines == 0 {
            return;
        }
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.lines.iter().map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.len() == 1 && self.lines[0].is_empty()
    }

    pub fn text(&self) -> String {
        let mut text = String::new();
        for (index, line) in self.lines.iter().enumerate() {
            if index > 0 {
                text.push('\n');
            }
            text.push_str(line);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backspace_joins_lines() {
        let mut view = ConsoleView::new(0);
        view.push_str("ab\n");
        view.delete_previous_char();
        assert_eq!(view.text(), "ab");
        view.delete_previous_char();
        assert_eq!(view.text(), "a");
    }

    #[test]
    fn test_line_cap_drops_oldest() {
        let mut view = ConsoleView::new(3);
        view.push_str("1\n2\n3\n4");
        assert_eq!(view.text(), "2\n3\n4");
        assert_eq!(view.line_count(), 3);
    }

    #[test]
    fn test_remove_last_line() {
        let mut view = ConsoleView::new(0);
        view.push_str("first\nsecond\n");
        view.remove_last_line();
        assert_eq!(view.text(), "first\n");
        view.push_str("again\n");
        assert_eq!(view.text(), "first\nagain\n");
    }
}
