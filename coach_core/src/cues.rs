//! Audio cue collaborator.

/// Receives countdown notifications for the last seconds of a timer
pub trait CountdownCue: Send {
    /// `seconds_left` counts down to 1; `resting` tells rest from work
    fn countdown(&mut self, seconds_left: u32, resting: bool);
}

/// Silent cue sink
#[derive(Debug, Default)]
pub struct NoCues;

impl CountdownCue for NoCues {
    fn countdown(&mut self, _seconds_left: u32, _resting: bool) {}
}
