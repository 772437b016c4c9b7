use std::fmt;

/// Steps of scratch disk provisioning, in the order they are visited.
///
/// A successful uncached run goes `CacheCheck → LocalCreate → Attach →
/// Validate → LocateDevice → Format → Detach → CacheSeed → Done`; a cache
/// hit goes straight from `CacheCheck` to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchState {
    CacheCheck,
    LocalCreate,
    Attach,
    Validate,
    LocateDevice,
    Format,
    Detach,
    CacheSeed,
    Done,
    Error,
}

impl ScratchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScratchState::CacheCheck => "cache_check",
            ScratchState::LocalCreate => "local_create",
            ScratchState::Attach => "attach",
            ScratchState::Validate => "validate",
            ScratchState::LocateDevice => "locate_device",
            ScratchState::Format => "format",
            ScratchState::Detach => "detach",
            ScratchState::CacheSeed => "cache_seed",
            ScratchState::Done => "done",
            ScratchState::Error => "error",
        }
    }

    /// Whether provisioning stops in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScratchState::Done | ScratchState::Error)
    }
}

impl fmt::Display for ScratchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
