/// Result of comparing a fresh extraction with the stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No previous content existed; this check establishes the baseline.
    Baseline,
    Unchanged,
    Changed,
}

impl Change {
    pub fn is_changed(self) -> bool {
        matches!(self, Change::Changed)
    }
}

/// Classifies `current` against `previous`.
///
/// Content reaching this point was already trimmed by the extractor. The
/// comparison is exact and whitespace sensitive beyond that trim.
pub fn detect_change(previous: Option<&str>, current: &str) -> Change {
    match previous {
        None => Change::Baseline,
        Some(previous) if previous == current => Change::Unchanged,
        Some(_) => Change::Changed,
    }
}
