use std::{cmp::Ordering, collections::VecDeque, fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{CalibrationError, Result};

/// Lane identity of a note and of the hit window that judges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pitch {
    Low,
    Mid,
    High,
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pitch::Low => "low",
            Pitch::Mid => "mid",
            Pitch::High => "high",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: Pitch,
    pub beat_position: f64,
}

impl Note {
    pub fn new(pitch: Pitch, beat_position: f64) -> Self {
        Self {
            pitch,
            beat_position,
        }
    }
}

/// Immutable per-run song descriptor. Notes are kept sorted by beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    /// Reference to the audio asset; playback itself is the host's concern.
    #[serde(default)]
    pub track: Option<String>,
    pub bpm: f64,
    pub duration_in_beats: f64,
    #[serde(default)]
    notes: Vec<Note>,
}

impl Song {
    pub fn new(bpm: f64, duration_in_beats: f64, notes: Vec<Note>) -> Result<Self> {
        let mut song = Self {
            track: None,
            bpm,
            duration_in_beats,
            notes,
        };
        song.normalise()?;
        Ok(song)
    }

    pub fn with_track(mut self, track: impl Into<String>) -> Self {
        self.track = Some(track.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut song: Song = serde_json::from_str(json)?;
        song.normalise()?;
        Ok(song)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let song = Self::from_json_str(&json)?;
        tracing::debug!(?path, notes = song.notes.len(), bpm = song.bpm, "loaded song");
        Ok(song)
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Checks every note against the configured lanes: at least one lane,
    /// no pitch served twice, and every note's pitch served exactly once.
    pub fn validate_lanes(&self, lanes: &[Pitch]) -> Result<()> {
        validate_lane_set(lanes)?;

        match self.notes.iter().find(|note| !lanes.contains(&note.pitch)) {
            Some(note) => Err(CalibrationError::UnmappedPitch {
                pitch: note.pitch,
                beat: note.beat_position,
            }),
            None => Ok(()),
        }
    }

    /// Fresh single-pass queue over this song's notes.
    pub fn pending_notes(&self) -> PendingNotes {
        PendingNotes {
            notes: self.notes.iter().copied().collect(),
        }
    }

    fn normalise(&mut self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(CalibrationError::InvalidTempo(self.bpm));
        }
        if !(self.duration_in_beats.is_finite() && self.duration_in_beats >= 0.0) {
            return Err(CalibrationError::InvalidParameter {
                name: "duration_in_beats",
                value: self.duration_in_beats,
            });
        }

        for note in &self.notes {
            let beat = note.beat_position;
            if !beat.is_finite() || beat < 0.0 || beat > self.duration_in_beats {
                return Err(CalibrationError::NoteBeyondSongEnd {
                    beat,
                    duration: self.duration_in_beats,
                });
            }
        }

        // Stable, so notes sharing a beat keep their authored order.
        self.notes.sort_by(|a, b| {
            a.beat_position
                .partial_cmp(&b.beat_position)
                .unwrap_or(Ordering::Equal)
        });
        Ok(())
    }
}

pub(crate) fn validate_lane_set(lanes: &[Pitch]) -> Result<()> {
    if lanes.is_empty() {
        return Err(CalibrationError::NoHitWindows);
    }
    for (index, pitch) in lanes.iter().enumerate() {
        if lanes[index + 1..].contains(pitch) {
            return Err(CalibrationError::DuplicatePitch(*pitch));
        }
    }
    Ok(())
}

/// Notes not yet spawned, consumed destructively from the front.
///
/// Sorted on construction, so only the head ever needs inspecting.
#[derive(Debug, Clone, Default)]
pub struct PendingNotes {
    notes: VecDeque<Note>,
}

impl PendingNotes {
    pub fn peek(&self) -> Option<&Note> {
        self.notes.front()
    }

    pub fn pop(&mut self) -> Option<Note> {
        self.notes.pop_front()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONG_JSON: &str = r#"{
        "track": "metronome.ogg",
        "bpm": 120.0,
        "duration_in_beats": 16.0,
        "notes": [
            { "pitch": "high", "beat_position": 8.0 },
            { "pitch": "low", "beat_position": 4.0 },
            { "pitch": "mid", "beat_position": 6.0 }
        ]
    }"#;

    #[test]
    fn sorts_notes_on_load() {
        let song = Song::from_json_str(SONG_JSON).unwrap();
        let beats: Vec<f64> = song.notes().iter().map(|n| n.beat_position).collect();
        assert_eq!(beats, vec![4.0, 6.0, 8.0]);
        assert_eq!(song.seconds_per_beat(), 0.5);
        assert_eq!(song.track.as_deref(), Some("metronome.ogg"));
    }

    #[test]
    fn pending_queue_is_single_pass() {
        let song = Song::from_json_str(SONG_JSON).unwrap();
        let mut pending = song.pending_notes();
        assert_eq!(pending.peek().map(|n| n.pitch), Some(Pitch::Low));
        assert_eq!(pending.pop().map(|n| n.beat_position), Some(4.0));
        assert_eq!(pending.len(), 2);
        pending.pop();
        pending.pop();
        assert!(pending.pop().is_none());
        assert!(pending.is_empty());

        // The song itself is untouched.
        assert_eq!(song.note_count(), 3);
    }

    #[test]
    fn rejects_unmapped_pitch() {
        let song = Song::from_json_str(SONG_JSON).unwrap();
        let err = song.validate_lanes(&[Pitch::Low, Pitch::Mid]).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::UnmappedPitch { pitch: Pitch::High, .. }
        ));
        assert!(song
            .validate_lanes(&[Pitch::High, Pitch::Low, Pitch::Mid])
            .is_ok());
    }

    #[test]
    fn rejects_duplicate_and_missing_lanes() {
        let song = Song::new(100.0, 4.0, Vec::new()).unwrap();
        assert!(matches!(
            song.validate_lanes(&[]),
            Err(CalibrationError::NoHitWindows)
        ));
        assert!(matches!(
            song.validate_lanes(&[Pitch::Mid, Pitch::Low, Pitch::Mid]),
            Err(CalibrationError::DuplicatePitch(Pitch::Mid))
        ));
    }

    #[test]
    fn rejects_bad_tempo_and_out_of_range_notes() {
        assert!(matches!(
            Song::new(0.0, 4.0, Vec::new()),
            Err(CalibrationError::InvalidTempo(_))
        ));
        assert!(matches!(
            Song::new(120.0, 4.0, vec![Note::new(Pitch::Low, 5.0)]),
            Err(CalibrationError::NoteBeyondSongEnd { .. })
        ));
        assert!(Song::from_json_str("{ \"bpm\": 120 }").is_err());
    }
}
