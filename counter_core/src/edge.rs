//! Two-state edge detector: one item per complete high-then-low pulse.
use counter_traits::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeState {
    #[default]
    Idle,
    /// A rising edge was seen; waiting for the matching falling edge.
    Armed,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeDetector {
    state: EdgeState,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one logical level; returns true exactly on the falling edge that
    /// completes an armed pulse.
    pub fn feed(&mut self, level: Level) -> bool {
        match (self.state, level) {
            (_, Level::High) => {
                self.state = EdgeState::Armed;
                false
            }
            (EdgeState::Armed, Level::Low) => {
                self.state = EdgeState::Idle;
                true
            }
            (EdgeState::Idle, Level::Low) => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state == EdgeState::Armed
    }

    pub fn disarm(&mut self) {
        self.state = EdgeState::Idle;
    }
}
