use jiff::{RoundMode, Unit, Zoned, ZonedRound};

/// Source of the wall-clock time recorded when a data dump completes.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Zoned;
}

/// Local system time, truncated to whole seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Zoned {
        let now = Zoned::now();
        let round = ZonedRound::new()
            .smallest(Unit::Second)
            .mode(RoundMode::Trunc);
        now.round(round).unwrap_or(now)
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock(pub Zoned);

impl Clock for FixedClock {
    fn now(&self) -> Zoned {
        self.0.clone()
    }
}
