pub const SECONDS_PER_MINUTE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Preset,
    Custom,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preset => "preset",
            Self::Custom => "custom",
        }
    }
}

/// Outcome of one wall-clock second applied to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondTick {
    /// A full study-minute has accumulated; the reconciliation protocol
    /// should be dispatched for the active task.
    pub minute_elapsed: bool,
    /// The countdown reached zero on this tick.
    pub finished: bool,
}

/// Pure countdown state machine. Scheduling, task binding and store writes
/// all live in the engine; this tracks remaining seconds and the
/// seconds-since-last-minute accumulator.
#[derive(Debug, Clone)]
pub struct Countdown {
    mode: TimerMode,
    preset_duration_seconds: u32,
    custom_duration_seconds: u32,
    remaining_seconds: u32,
    seconds_since_minute: u32,
}

impl Countdown {
    pub fn new(preset_duration_seconds: u32) -> Self {
        Self {
            mode: TimerMode::Preset,
            preset_duration_seconds,
            custom_duration_seconds: 0,
            remaining_seconds: preset_duration_seconds,
            seconds_since_minute: 0,
        }
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn seconds_since_minute(&self) -> u32 {
        self.seconds_since_minute
    }

    /// Switches mode and resets the displayed countdown to the new mode's
    /// default: the preset duration, or zero for custom until configured.
    /// Callers are expected not to switch while running; the engine does not
    /// validate that restriction.
    pub fn set_mode(&mut self, mode: TimerMode) {
        self.mode = mode;
        self.rearm();
    }

    /// Configures the custom duration from minutes and seconds. Total must be
    /// greater than zero.
    pub fn configure_custom(&mut self, minutes: u32, seconds: u32) -> Result<(), String> {
        let total = minutes
            .saturating_mul(SECONDS_PER_MINUTE)
            .saturating_add(seconds);
        if total == 0 {
            return Err("custom duration must be greater than zero".to_string());
        }
        self.custom_duration_seconds = total;
        self.mode = TimerMode::Custom;
        self.rearm();
        Ok(())
    }

    /// Resets the countdown to the current mode's duration and clears the
    /// minute accumulator.
    pub fn rearm(&mut self) {
        self.remaining_seconds = self.mode_duration();
        self.seconds_since_minute = 0;
    }

    fn mode_duration(&self) -> u32 {
        match self.mode {
            TimerMode::Preset => self.preset_duration_seconds,
            TimerMode::Custom => self.custom_duration_seconds,
        }
    }

    /// Applies one second: decrements the remaining time and advances the
    /// minute accumulator, which wraps at 60 and reports a minute tick. A
    /// finished countdown stays at zero.
    pub fn tick_second(&mut self) -> SecondTick {
        if self.remaining_seconds == 0 {
            return SecondTick {
                minute_elapsed: false,
                finished: false,
            };
        }

        self.remaining_seconds -= 1;
        self.seconds_since_minute += 1;

        let minute_elapsed = self.seconds_since_minute >= SECONDS_PER_MINUTE;
        if minute_elapsed {
            self.seconds_since_minute = 0;
        }

        SecondTick {
            minute_elapsed,
            finished: self.remaining_seconds == 0,
        }
    }
}
