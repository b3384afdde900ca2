use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_STEPS: usize = 8;
pub const MAX_STEPS: usize = 64;

/// One cell of the grid. `roll` subdivides the step into 1..=4 hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCell {
    pub active: bool,
    pub velocity: u8,
    pub roll: u8,
}

impl StepCell {
    pub fn off() -> Self {
        Self { active: false, velocity: 100, roll: 1 }
    }

    pub fn hit(velocity: u8) -> Self {
        Self { active: true, velocity: velocity.clamp(1, 127), roll: 1 }
    }

    pub fn set_roll(&mut self, roll: u8) {
        self.roll = roll.clamp(1, 4);
    }
}

impl Default for StepCell {
    fn default() -> Self {
        Self::off()
    }
}

/// A row of cells bound to one fixed pitch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    pub pitch: u8,
    pub cells: Vec<StepCell>,
}

impl StepRow {
    pub fn new(pitch: u8, steps: usize) -> Self {
        Self { pitch: pitch.min(127), cells: vec![StepCell::off(); steps] }
    }
}

/// A live 16th-note grid that loops alongside the timeline. Rows share the
/// pattern's step count; the pattern plays through `instrument`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPattern {
    pub id: Uuid,
    pub name: String,
    pub instrument: Uuid,
    pub enabled: bool,
    pub steps: usize,
    /// 0..=100; at 100 every odd step lands halfway into the next step.
    pub swing: f32,
    pub rows: Vec<StepRow>,
}

impl StepPattern {
    pub fn new(name: &str, instrument: Uuid, steps: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            instrument,
            enabled: true,
            steps: steps.clamp(MIN_STEPS, MAX_STEPS),
            swing: 0.0,
            rows: Vec::new(),
        }
    }

    pub fn set_swing(&mut self, swing: f32) {
        self.swing = swing.clamp(0.0, 100.0);
    }

    pub fn add_row(&mut self, pitch: u8) -> &mut StepRow {
        let idx = self.rows.len();
        self.rows.push(StepRow::new(pitch, self.steps));
        &mut self.rows[idx]
    }

    /// Changes the step count, truncating or padding every row.
    pub fn resize(&mut self, steps: usize) {
        self.steps = steps.clamp(MIN_STEPS, MAX_STEPS);
        for row in &mut self.rows {
            row.cells.resize(self.steps, StepCell::off());
        }
    }

    pub fn toggle(&mut self, row: usize, step: usize) -> bool {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.cells.get_mut(step)) {
            cell.active = !cell.active;
            cell.active
        } else {
            false
        }
    }

    /// Loop period in beats on the 16th-note grid.
    pub fn period_beats(&self) -> f64 {
        self.steps as f64 * 0.25
    }
}
