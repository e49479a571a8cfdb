use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    hit_window::{is_recorded, HitWindow, NO_OFFSET_RECORDED},
    Result,
};

/// Calibration technique a set of statistics belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Baseline run played without any latency compensation.
    NoOffset,
    Gameplay,
    BeatMatching,
    AutoCalculated,
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Technique::NoOffset => "no latency offset",
            Technique::Gameplay => "gameplay",
            Technique::BeatMatching => "beat matching",
            Technique::AutoCalculated => "auto calculated",
        };
        f.write_str(name)
    }
}

/// Read-only view that rolls per-window counters up to run level.
#[derive(Debug, Clone, Copy)]
pub struct RunAggregator<'a> {
    windows: &'a [HitWindow],
    prompt_total: usize,
}

impl<'a> RunAggregator<'a> {
    /// `prompt_total` is the denominator for the hit percentage: the song's
    /// note count, or the number of prompts spawned for generated runs.
    pub fn new(windows: &'a [HitWindow], prompt_total: usize) -> Self {
        Self {
            windows,
            prompt_total,
        }
    }

    pub fn total_hit(&self) -> u32 {
        self.windows.iter().map(HitWindow::hit_count).sum()
    }

    pub fn total_missed(&self) -> u32 {
        self.windows.iter().map(HitWindow::miss_count).sum()
    }

    /// Mean of the per-window averages, ignoring windows with no samples.
    /// [`NO_OFFSET_RECORDED`] if no window has any.
    pub fn average_closest_offset(&self) -> f64 {
        let (sum, count) = self
            .windows
            .iter()
            .map(HitWindow::average_closest_offset)
            .filter(|average| is_recorded(*average))
            .fold((0.0, 0usize), |(sum, count), average| (sum + average, count + 1));

        if count == 0 {
            NO_OFFSET_RECORDED
        } else {
            sum / count as f64
        }
    }

    /// Percentage (0 to 100) of prompts hit. A run with nothing to hit counts
    /// as 100%.
    pub fn hit_percentage(&self) -> f64 {
        if self.prompt_total == 0 {
            return 100.0;
        }
        f64::from(self.total_hit()) / self.prompt_total as f64 * 100.0
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total_hit: self.total_hit(),
            total_missed: self.total_missed(),
            prompt_total: self.prompt_total,
            hit_percentage: self.hit_percentage(),
            average_closest_offset: self.average_closest_offset(),
        }
    }
}

/// Snapshot of one run's aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_hit: u32,
    pub total_missed: u32,
    pub prompt_total: usize,
    pub hit_percentage: f64,
    pub average_closest_offset: f64,
}

/// Statistics recorded for one calibration technique.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRunStats {
    /// Seconds the operator spent in the calibration phase.
    pub duration: f64,
    pub latency_offset: f64,
    pub hit_percentage: f64,
    pub average_offset: f64,
}

impl Default for CalibrationRunStats {
    fn default() -> Self {
        Self {
            duration: 0.0,
            latency_offset: 0.0,
            hit_percentage: 0.0,
            average_offset: NO_OFFSET_RECORDED,
        }
    }
}

impl CalibrationRunStats {
    pub fn apply_summary(&mut self, summary: &RunSummary) {
        self.hit_percentage = summary.hit_percentage;
        self.average_offset = summary.average_closest_offset;
    }
}

/// Frozen statistics for every technique run so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsTable {
    entries: BTreeMap<Technique, CalibrationRunStats>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, technique: Technique, stats: CalibrationRunStats) {
        self.entries.insert(technique, stats);
    }

    pub fn get(&self, technique: Technique) -> Option<&CalibrationRunStats> {
        self.entries.get(&technique)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Technique, &CalibrationRunStats)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HitWindowConfig, song::Pitch};

    fn windows() -> Vec<HitWindow> {
        [Pitch::Low, Pitch::Mid, Pitch::High]
            .iter()
            .map(|pitch| HitWindow::new(*pitch, pitch.to_string(), &HitWindowConfig::default()))
            .collect()
    }

    #[test]
    fn totals_sum_over_windows() {
        let mut windows = windows();
        windows[0].register_result(true, Some(0.01));
        windows[1].register_result(true, None);
        windows[1].register_result(false, None);
        windows[2].register_result(false, Some(0.2));

        let aggregator = RunAggregator::new(&windows, 5);
        assert_eq!(aggregator.total_hit(), 2);
        assert_eq!(aggregator.total_missed(), 2);
        assert!((aggregator.hit_percentage() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn average_skips_windows_without_samples() {
        let mut windows = windows();
        windows[0].register_result(true, Some(0.02));
        windows[0].register_result(true, Some(0.04));
        windows[2].register_result(true, Some(-0.01));

        let average = RunAggregator::new(&windows, 3).average_closest_offset();
        // (0.03 + -0.01) / 2, the empty middle window does not dilute it.
        assert!((average - 0.01).abs() < 1e-12);
    }

    #[test]
    fn degenerate_runs_have_defined_results() {
        let windows = windows();
        let aggregator = RunAggregator::new(&windows, 0);
        assert_eq!(aggregator.average_closest_offset(), NO_OFFSET_RECORDED);
        assert_eq!(aggregator.hit_percentage(), 100.0);

        let summary = aggregator.summary();
        assert_eq!(summary.total_hit + summary.total_missed, 0);
    }

    #[test]
    fn results_table_serialises_by_technique() {
        let mut table = ResultsTable::new();
        let mut stats = CalibrationRunStats {
            duration: 12.5,
            latency_offset: 0.05,
            ..CalibrationRunStats::default()
        };
        stats.apply_summary(&RunSummary {
            total_hit: 3,
            total_missed: 1,
            prompt_total: 4,
            hit_percentage: 75.0,
            average_closest_offset: 0.02,
        });
        table.record(Technique::Gameplay, stats);
        table.record(Technique::NoOffset, CalibrationRunStats::default());

        let json = table.to_json_pretty().unwrap();
        assert!(json.contains("\"gameplay\""));
        assert!(json.contains("\"no_offset\""));

        let reloaded: ResultsTable = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.get(Technique::Gameplay).unwrap().hit_percentage, 75.0);
        assert_eq!(reloaded.len(), 2);
    }
}
