//! Per-weekday opening hours for department records.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
    Holiday,
}

impl Weekday {
    pub const ALL: [Weekday; 8] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
        Weekday::Holiday,
    ];

    /// Prefix the published department files use for this day's time columns.
    pub fn column_prefix(self) -> &'static str {
        match self {
            Weekday::Monday => "月",
            Weekday::Tuesday => "火",
            Weekday::Wednesday => "水",
            Weekday::Thursday => "木",
            Weekday::Friday => "金",
            Weekday::Saturday => "土",
            Weekday::Sunday => "日",
            Weekday::Holiday => "祝",
        }
    }

    pub fn start_column(self) -> String {
        format!("{}_診療開始時間", self.column_prefix())
    }

    pub fn end_column(self) -> String {
        format!("{}_診療終了時間", self.column_prefix())
    }
}

/// Free-form start/end strings. A missing side is stored as "".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayHours {
    pub start: String,
    pub end: String,
}

impl DayHours {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Built from optional sides; `None` when both are absent.
    pub fn from_parts(start: Option<String>, end: Option<String>) -> Option<Self> {
        if start.is_none() && end.is_none() {
            return None;
        }
        Some(Self::new(start.unwrap_or_default(), end.unwrap_or_default()))
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }
}

/// Serializes as `{"monday": {"start": .., "end": ..}, ...}`; absent days have no key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WeeklySchedule(BTreeMap<Weekday, DayHours>);

impl WeeklySchedule {
    #[cfg(test)]
    pub fn get(&self, day: Weekday) -> Option<&DayHours> {
        self.0.get(&day)
    }

    #[cfg(test)]
    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains_key(&day)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Folds `incoming` into `self`. Days missing from `self`, or present but
    /// empty, take the incoming entry; a non-empty existing day is never replaced.
    pub fn merge_from(&mut self, incoming: WeeklySchedule) {
        for (day, hours) in incoming.0 {
            match self.0.get(&day) {
                Some(existing) if !existing.is_empty() => {}
                _ => {
                    self.0.insert(day, hours);
                }
            }
        }
    }

    pub fn merged(mut self, incoming: WeeklySchedule) -> WeeklySchedule {
        self.merge_from(incoming);
        self
    }
}

/// Merge for possibly-absent schedules: an absent side yields the other one.
pub fn merge_optional(
    existing: Option<WeeklySchedule>,
    incoming: Option<WeeklySchedule>,
) -> Option<WeeklySchedule> {
    match (existing, incoming) {
        (None, incoming) => incoming,
        (existing, None) => existing,
        (Some(existing), Some(incoming)) => Some(existing.merged(incoming)),
    }
}

impl FromIterator<(Weekday, DayHours)> for WeeklySchedule {
    fn from_iter<I: IntoIterator<Item = (Weekday, DayHours)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
