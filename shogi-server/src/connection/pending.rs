use std::collections::VecDeque;

use super::Input;

/// Lines that arrived before it was the player's turn, oldest first.
#[derive(Debug, Default)]
pub struct PendingInputQueue {
    lines: VecDeque<Input>,
}

impl PendingInputQueue {
    pub fn push(&mut self, input: Input) {
        self.lines.push_back(input);
    }

    pub fn pop(&mut self) -> Option<Input> {
        self.lines.pop_front()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}
