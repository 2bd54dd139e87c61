//! Plain-text artifacts handed to guests and the front desk.

use chrono::{DateTime, FixedOffset, Utc};

use crate::{
    records::{Detail, Invoice, Report},
    types::RoomId,
};

const RULE: &str = "-------------------------------------------------";
const END: &str = "====================== END ======================";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub filename: String,
    pub body: String,
}

fn timestamp(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn filename(room: &RoomId, start: DateTime<Utc>, finish: DateTime<Utc>, offset: FixedOffset) -> String {
    let compact = |at: DateTime<Utc>| at.with_timezone(&offset).format("%Y%m%dT%H%M%S").to_string();
    format!("{room}_{}_{}.txt", compact(start), compact(finish))
}

fn finish(lines: Vec<String>) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

/// Detail rows sorted by start time; `None` when there is nothing to print.
pub fn render_detail(details: &[&Detail], offset: FixedOffset) -> Option<RenderedFile> {
    let mut rows = details.to_vec();
    rows.sort_by_key(|detail| detail.start);
    let first = rows.first()?;
    let last = rows.last()?;

    let mut lines = vec![
        "==================== DETAIL ====================".to_string(),
        format!("ROOM ID: {}", first.room_id),
    ];
    for (index, detail) in rows.iter().enumerate() {
        lines.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{:.2}",
            index + 1,
            timestamp(detail.start, offset),
            timestamp(detail.finish, offset),
            detail.speed,
            detail.fee_rate,
            detail.fee
        ));
    }
    lines.push(END.to_string());

    Some(RenderedFile {
        filename: filename(&first.room_id, first.start, last.finish, offset),
        body: finish(lines),
    })
}

pub fn render_invoice(invoice: &Invoice, offset: FixedOffset) -> RenderedFile {
    let lines = vec![
        "==================== INVOICE ====================".to_string(),
        format!("ROOM ID: {}", invoice.room_id),
        format!("CHECK IN TIME: {}", timestamp(invoice.check_in, offset)),
        format!("CHECK OUT TIME: {}", timestamp(invoice.check_out, offset)),
        RULE.to_string(),
        format!("SERVICE TIME: {:.0}s", invoice.service_secs),
        format!("TOTAL FEE: {:.2}", invoice.total_fee),
        END.to_string(),
    ];

    RenderedFile {
        filename: filename(&invoice.room_id, invoice.check_in, invoice.check_out, offset),
        body: finish(lines),
    }
}

pub fn render_report(report: &Report, offset: FixedOffset) -> RenderedFile {
    let lines = vec![
        "==================== REPORT ====================".to_string(),
        format!("ROOM ID: {}", report.room_id),
        format!("START TIME: {}", timestamp(report.start, offset)),
        format!("FINISH TIME: {}", timestamp(report.finish, offset)),
        RULE.to_string(),
        format!("TIMES OF ON AND OFF: {}", report.times_of_on_off),
        format!("TIMES OF DISPATCH: {}", report.times_of_dispatch),
        format!("TIMES OF CHANGE TEMPERATURE: {}", report.times_of_change_temp),
        format!("TIMES OF CHANGE FAN SPEED: {}", report.times_of_change_speed),
        format!("NUMBER OF DETAIL: {}", report.number_of_detail),
        format!("SERVICE TIME: {:.0}s", report.service_secs),
        format!("TOTAL FEE: {:.2}", report.fee),
        END.to_string(),
    ];

    RenderedFile {
        filename: filename(&report.room_id, report.start, report.finish, offset),
        body: finish(lines),
    }
}
