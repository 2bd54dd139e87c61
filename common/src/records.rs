//! Billing and audit records handed to the durable log, plus the queries the
//! detail, invoice and report endpoints run over them.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FanSpeed, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    CheckIn,
    CheckOut,
    PowerOn,
    PowerOff,
    Dispatch,
    ChangeTemp,
    ChangeSpeed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLog {
    pub room_id: RoomId,
    pub operation: Operation,
    pub at: DateTime<Utc>,
}

/// One continuous stretch of active service at a single speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    pub room_id: RoomId,
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub speed: FanSpeed,
    pub fee_rate: f64,
    pub fee: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub room_id: RoomId,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub total_fee: f64,
    pub service_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlantRecord {
    Operation(OperationLog),
    Detail(Detail),
    Invoice(Invoice),
}

impl PlantRecord {
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Operation(log) => &log.room_id,
            Self::Detail(detail) => &detail.room_id,
            Self::Invoice(invoice) => &invoice.room_id,
        }
    }
}

/// Append-only history of plant records.
pub trait RecordStore {
    fn append(&mut self, record: PlantRecord);

    fn operations(&self, room: &RoomId) -> Vec<&OperationLog>;

    fn details(&self, room: &RoomId) -> Vec<&Detail>;

    fn invoices(&self, room: &RoomId) -> Vec<&Invoice>;

    fn latest_invoice(&self, room: &RoomId) -> Option<&Invoice> {
        self.invoices(room)
            .into_iter()
            .max_by_key(|invoice| invoice.check_out)
    }

    /// Detail rows of the room's most recent stay, ordered by start time.
    fn details_for_stay(&self, room: &RoomId) -> Vec<&Detail> {
        let Some(check_in) = self
            .operations(room)
            .into_iter()
            .filter(|log| log.operation == Operation::CheckIn)
            .map(|log| log.at)
            .max()
        else {
            return Vec::new();
        };

        let check_out = self
            .invoices(room)
            .into_iter()
            .filter(|invoice| invoice.check_in >= check_in)
            .map(|invoice| invoice.check_out)
            .min();

        let mut details: Vec<&Detail> = self
            .details(room)
            .into_iter()
            .filter(|detail| detail.start >= check_in)
            .filter(|detail| check_out.map_or(true, |end| detail.finish <= end))
            .collect();
        details.sort_by_key(|detail| detail.start);
        details
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<PlantRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PlantRecord] {
        &self.records
    }
}

impl RecordStore for MemoryStore {
    fn append(&mut self, record: PlantRecord) {
        self.records.push(record);
    }

    fn operations(&self, room: &RoomId) -> Vec<&OperationLog> {
        self.records
            .iter()
            .filter_map(|record| match record {
                PlantRecord::Operation(log) if &log.room_id == room => Some(log),
                _ => None,
            })
            .collect()
    }

    fn details(&self, room: &RoomId) -> Vec<&Detail> {
        self.records
            .iter()
            .filter_map(|record| match record {
                PlantRecord::Detail(detail) if &detail.room_id == room => Some(detail),
                _ => None,
            })
            .collect()
    }

    fn invoices(&self, room: &RoomId) -> Vec<&Invoice> {
        self.records
            .iter()
            .filter_map(|record| match record {
                PlantRecord::Invoice(invoice) if &invoice.room_id == room => Some(invoice),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Some(Self::Day),
            "week" | "weekly" => Some(Self::Week),
            "month" | "monthly" => Some(Self::Month),
            _ => None,
        }
    }

    /// Half-open local date range `[first, end)` containing `date`, or `None`
    /// when the range leaves chrono's calendar.
    pub fn date_range(self, date: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::Day => Some((date, date.checked_add_signed(Duration::days(1))?)),
            Self::Week => {
                let back = i64::from(date.weekday().num_days_from_monday());
                let first = date.checked_sub_signed(Duration::days(back))?;
                Some((first, first.checked_add_signed(Duration::days(7))?))
            }
            Self::Month => {
                let first = date.with_day(1)?;
                let end = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                }?;
                Some((first, end))
            }
        }
    }

    /// Range boundaries as instants, interpreting dates at midnight in `offset`.
    pub fn bounds(
        self,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (first, end) = self.date_range(date)?;
        let start = offset
            .from_local_datetime(&first.and_hms_opt(0, 0, 0)?)
            .single()?;
        let finish = offset
            .from_local_datetime(&end.and_hms_opt(0, 0, 0)?)
            .single()?;
        Some((start.with_timezone(&Utc), finish.with_timezone(&Utc)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub room_id: RoomId,
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub times_of_on_off: usize,
    pub times_of_dispatch: usize,
    pub times_of_change_temp: usize,
    pub times_of_change_speed: usize,
    pub number_of_detail: usize,
    pub service_secs: f64,
    pub fee: f64,
}

impl Report {
    /// Aggregates everything recorded for `room` within `[start, finish)`.
    pub fn build(
        store: &impl RecordStore,
        room: &RoomId,
        start: DateTime<Utc>,
        finish: DateTime<Utc>,
    ) -> Self {
        let in_range = |at: DateTime<Utc>| start <= at && at < finish;

        let mut report = Self {
            room_id: room.clone(),
            start,
            finish,
            times_of_on_off: 0,
            times_of_dispatch: 0,
            times_of_change_temp: 0,
            times_of_change_speed: 0,
            number_of_detail: 0,
            service_secs: 0.0,
            fee: 0.0,
        };

        for log in store.operations(room) {
            if !in_range(log.at) {
                continue;
            }
            match log.operation {
                Operation::PowerOn | Operation::PowerOff => report.times_of_on_off += 1,
                Operation::Dispatch => report.times_of_dispatch += 1,
                Operation::ChangeTemp => report.times_of_change_temp += 1,
                Operation::ChangeSpeed => report.times_of_change_speed += 1,
                Operation::CheckIn | Operation::CheckOut => {}
            }
        }

        for detail in store.details(room) {
            if in_range(detail.start) {
                report.number_of_detail += 1;
                report.service_secs += detail.duration_secs;
                report.fee += detail.fee;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, hour, minute, 0).unwrap()
    }

    fn op(room: &str, operation: Operation, when: DateTime<Utc>) -> PlantRecord {
        PlantRecord::Operation(OperationLog {
            room_id: RoomId::from(room),
            operation,
            at: when,
        })
    }

    fn detail(room: &str, start: DateTime<Utc>, minutes: i64, fee: f64) -> PlantRecord {
        PlantRecord::Detail(Detail {
            room_id: RoomId::from(room),
            start,
            finish: start + Duration::minutes(minutes),
            speed: FanSpeed::Normal,
            fee_rate: 0.75,
            fee,
            duration_secs: (minutes * 60) as f64,
        })
    }

    #[test]
    fn report_counts_operations_in_range() {
        let mut store = MemoryStore::new();
        store.append(op("309c", Operation::CheckIn, at(8, 0)));
        store.append(op("309c", Operation::PowerOn, at(8, 1)));
        store.append(op("309c", Operation::Dispatch, at(8, 1)));
        store.append(op("309c", Operation::ChangeTemp, at(8, 5)));
        store.append(op("309c", Operation::ChangeSpeed, at(8, 6)));
        store.append(op("309c", Operation::PowerOff, at(9, 0)));
        store.append(op("310c", Operation::PowerOn, at(8, 2)));
        store.append(op("309c", Operation::PowerOn, at(23, 59)));
        store.append(detail("309c", at(8, 1), 5, 3.75));
        store.append(detail("309c", at(8, 6), 54, 81.0));

        let report = Report::build(&store, &RoomId::from("309c"), at(0, 0), at(12, 0));

        assert_eq!(report.times_of_on_off, 2);
        assert_eq!(report.times_of_dispatch, 1);
        assert_eq!(report.times_of_change_temp, 1);
        assert_eq!(report.times_of_change_speed, 1);
        assert_eq!(report.number_of_detail, 2);
        assert_eq!(report.service_secs, 3_540.0);
        assert!((report.fee - 84.75).abs() < 1e-9);
    }

    #[test]
    fn details_for_stay_ignores_previous_guest() {
        let mut store = MemoryStore::new();
        store.append(op("309c", Operation::CheckIn, at(1, 0)));
        store.append(detail("309c", at(1, 10), 10, 7.5));
        store.append(PlantRecord::Invoice(Invoice {
            room_id: RoomId::from("309c"),
            check_in: at(1, 0),
            check_out: at(2, 0),
            total_fee: 7.5,
            service_secs: 600.0,
        }));
        store.append(op("309c", Operation::CheckIn, at(3, 0)));
        store.append(detail("309c", at(3, 30), 2, 1.5));

        let details = store.details_for_stay(&RoomId::from("309c"));

        assert_eq!(details.len(), 1);
        assert_eq!(details[0].start, at(3, 30));
    }

    #[test]
    fn latest_invoice_picks_last_check_out() {
        let mut store = MemoryStore::new();
        for (check_in, check_out) in [(at(1, 0), at(2, 0)), (at(3, 0), at(4, 0))] {
            store.append(PlantRecord::Invoice(Invoice {
                room_id: RoomId::from("f3"),
                check_in,
                check_out,
                total_fee: 1.0,
                service_secs: 60.0,
            }));
        }

        let invoice = store.latest_invoice(&RoomId::from("f3")).unwrap();
        assert_eq!(invoice.check_out, at(4, 0));
        assert!(store.latest_invoice(&RoomId::from("309c")).is_none());
    }

    #[test]
    fn week_range_starts_on_monday() {
        // Jan 8, 2026 is a Thursday.
        let date = NaiveDate::from_ymd_opt(2026, 1, 8).unwrap();
        let (first, end) = ReportPeriod::Week.date_range(date).unwrap();

        assert_eq!(first, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 1, 12).unwrap());
    }

    #[test]
    fn month_range_wraps_year() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 17).unwrap();
        let (first, end) = ReportPeriod::Month.date_range(date).unwrap();

        assert_eq!(first, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn ranges_at_calendar_edges_are_rejected() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();

        assert_eq!(ReportPeriod::Day.date_range(NaiveDate::MAX), None);
        assert_eq!(ReportPeriod::Month.date_range(NaiveDate::MAX), None);
        assert_eq!(ReportPeriod::Day.bounds(NaiveDate::MAX, offset), None);
        assert_eq!(ReportPeriod::Week.bounds(NaiveDate::MIN, offset), None);

        let parsed = NaiveDate::parse_from_str("+262142-12-31", "%Y-%m-%d").unwrap();
        assert_eq!(ReportPeriod::Week.bounds(parsed, offset), None);
    }

    #[test]
    fn day_bounds_respect_offset() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let (start, finish) = ReportPeriod::Day.bounds(date, offset).unwrap();

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 4, 16, 0, 0).unwrap());
        assert_eq!(finish - start, Duration::days(1));
    }

    #[test]
    fn record_serializes_with_kind_tag() {
        let record = op("309c", Operation::PowerOn, at(8, 0));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["kind"], "operation");
        assert_eq!(json["operation"], "POWER_ON");
        let back: PlantRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
