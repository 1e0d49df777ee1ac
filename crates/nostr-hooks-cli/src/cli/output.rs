use chrono::DateTime;
use nostr_sdk::prelude::*;

const CONTENT_PREVIEW_CHARS: usize = 80;

/// One line per event: JSON, or a short human-readable summary.
pub fn format_event(event: &Event, json: bool) -> String {
    if json {
        return event.as_json();
    }

    let time = DateTime::from_timestamp(event.created_at.as_u64() as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| event.created_at.as_u64().to_string());
    let author: String = event.pubkey.to_hex().chars().take(8).collect();

    format!(
        "{} {:>5} {} {}",
        time,
        event.kind.as_u16(),
        author,
        preview(&event.content)
    )
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= CONTENT_PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(CONTENT_PREVIEW_CHARS - 1).collect();
    cut.push('…');
    cut
}
