//! Public types for list controllers.

/// Top-level state of a canonical collection.
///
/// `Loaded` and `Errored` both re-enter `Loading` on refresh or filter
/// change. Optimistic mutations operate on loaded data directly and never
/// change this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    /// No load attempted yet
    Idle,
    /// Bulk load in flight
    Loading,
    /// Collection reflects the last successful load
    Loaded,
    /// Last load failed terminally
    Errored,
}

impl std::fmt::Display for ListState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Loaded => write!(f, "Loaded"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_state_display() {
        assert_eq!(format!("{}", ListState::Idle), "Idle");
        assert_eq!(format!("{}", ListState::Loading), "Loading");
        assert_eq!(format!("{}", ListState::Loaded), "Loaded");
        assert_eq!(format!("{}", ListState::Errored), "Errored");
    }
}
