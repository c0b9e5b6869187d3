use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 3;
const TREND_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rise,
    Fall,
    Unchanged,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rise => "rise",
            Self::Fall => "fall",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Newest-first sample history of bounded length.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, value: f64) -> Vec<f64> {
        self.samples.push_front(value);
        self.samples.truncate(self.capacity);
        self.samples.iter().copied().collect()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Compares the newest sample against the oldest one retained, so a
    /// window that has not filled yet still reports a direction.
    pub fn trend(&self) -> Option<Trend> {
        let newest = *self.samples.front()?;
        let oldest = *self.samples.back()?;
        if (newest - oldest).abs() <= TREND_TOLERANCE {
            Some(Trend::Unchanged)
        } else if newest > oldest {
            Some(Trend::Rise)
        } else {
            Some(Trend::Fall)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// The windows one module instance smooths across fetch cycles.
#[derive(Debug, Clone, Default)]
pub struct RollingWindows {
    pub temperature: RollingWindow,
    pub wind: RollingWindow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_newest_first_and_trims() {
        let mut window = RollingWindow::default();
        assert_eq!(window.push(1.0), vec![1.0]);
        assert_eq!(window.push(2.0), vec![2.0, 1.0]);
        assert_eq!(window.push(3.0), vec![3.0, 2.0, 1.0]);
        assert_eq!(window.push(4.0), vec![4.0, 3.0, 2.0]);
        for value in 0..50 {
            window.push(value as f64);
            assert!(window.len() <= window.capacity());
        }
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn average_of_one_two_three_is_two() {
        let mut window = RollingWindow::default();
        window.push(1.0);
        window.push(2.0);
        window.push(3.0);
        assert_eq!(window.average(), Some(2.0));
    }

    #[test]
    fn empty_window_has_no_average_or_trend() {
        let window = RollingWindow::default();
        assert_eq!(window.average(), None);
        assert_eq!(window.trend(), None);
    }

    #[test]
    fn trend_uses_tolerance_band() {
        let mut window = RollingWindow::default();
        window.push(10.0);
        assert_eq!(window.trend(), Some(Trend::Unchanged));
        window.push(10.1);
        assert_eq!(window.trend(), Some(Trend::Unchanged));
        window.push(10.5);
        assert_eq!(window.trend(), Some(Trend::Rise));
        window.push(9.0);
        // oldest retained is now 10.1
        assert_eq!(window.trend(), Some(Trend::Fall));
    }

    #[test]
    fn trend_reports_before_the_window_fills() {
        let mut window = RollingWindow::default();
        window.push(12.0);
        window.push(14.0);
        assert_eq!(window.trend(), Some(Trend::Rise));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = RollingWindow::new(0);
        window.push(1.0);
        window.push(2.0);
        assert_eq!(window.len(), 1);
        assert_eq!(window.average(), Some(2.0));
    }
}
