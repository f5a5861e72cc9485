//! Raw platform review items to [`CanonicalReview`].

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::platform::Platform;
use crate::reconcile::fields::{field_table, FieldTable, RatingRule};
use crate::reviews::{CanonicalReview, ReviewImage};

const MENU_LABEL_KEYS: &[&str] = &["name", "menuName", "menu_name"];
const IMAGE_URL_KEYS: &[&str] = &["imageUrl", "url", "image_url", "img_url", "path"];
const REPLY_TEXT_KEYS: &[&str] = &["contents", "comment", "content", "text"];

/// Locates the review array inside a sync result. `None` means the result has
/// no list at all, which is distinct from an empty list.
pub fn extract_items(platform: Platform, result: &Value) -> Option<Vec<Value>> {
    let list = match platform {
        Platform::Baemin => result
            .get("reviews")
            .and_then(Value::as_array)
            .or_else(|| array_or_nested(result.get("list")?, "reviews")),
        Platform::CoupangEats => result
            .get("list")
            .and_then(|v| array_or_nested(v, "content"))
            .or_else(|| array_or_nested(result.get("data")?, "content")),
        Platform::Yogiyo | Platform::Ddangyo | Platform::Naver => {
            result.get("list").and_then(Value::as_array)
        }
    };
    list.cloned()
}

fn array_or_nested<'a>(v: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    v.as_array()
        .or_else(|| v.get(key).and_then(Value::as_array))
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub reviews: Vec<CanonicalReview>,
    pub skipped: usize,
}

/// Normalizes a whole fetch. Items without an external id are skipped; for
/// duplicated ids the last occurrence wins.
pub fn normalize_all(platform: Platform, items: &[Value]) -> Normalized {
    let mut out = Normalized::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        let Some(review) = normalize_item(platform, item) else {
            out.skipped += 1;
            continue;
        };
        match index.get(&review.external_id) {
            Some(&pos) => out.reviews[pos] = review,
            None => {
                index.insert(review.external_id.clone(), out.reviews.len());
                out.reviews.push(review);
            }
        }
    }

    if out.skipped > 0 {
        tracing::warn!(%platform, skipped = out.skipped, "review items without an id were skipped");
    }
    out
}

pub fn normalize_item(platform: Platform, item: &Value) -> Option<CanonicalReview> {
    let table = field_table(platform);
    let external_id = external_id(item, table.external_id)?;

    Some(CanonicalReview {
        external_id,
        rating: rating(item, table.rating),
        content: first_text(item, table.content),
        author_name: first_text(item, table.author_name),
        menus: menus(item, table.menus),
        images: images(item, table),
        written_at: written_at(item, table.written_at),
        platform_reply_content: reply(item, table.reply),
    })
}

fn candidates<'a>(item: &'a Value, keys: &'a [&'a str]) -> impl Iterator<Item = &'a Value> + 'a {
    keys.iter()
        .filter_map(move |k| item.get(*k))
        .filter(|v| !v.is_null())
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_text(item: &Value, keys: &[&str]) -> Option<String> {
    candidates(item, keys).find_map(|v| v.as_str().and_then(non_empty))
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn external_id(item: &Value, keys: &[&str]) -> Option<String> {
    candidates(item, keys).find_map(scalar_text)
}

fn rating(item: &Value, rule: RatingRule) -> Option<i32> {
    match rule {
        RatingRule::Numeric(keys) => numeric_rating(item, keys),
        RatingRule::EvalCode {
            field,
            positive,
            fallback,
        } => match item.get(field).and_then(scalar_text) {
            Some(code) => Some(if code == positive { 5 } else { 3 }),
            None => numeric_rating(item, fallback),
        },
    }
}

fn numeric_rating(item: &Value, keys: &[&str]) -> Option<i32> {
    candidates(item, keys).find_map(|v| {
        let n = match v {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then(|| n.round() as i32)
    })
}

fn menus(item: &Value, keys: &[&str]) -> Vec<String> {
    for v in candidates(item, keys) {
        let labels = match v {
            Value::Array(entries) => entries
                .iter()
                .filter_map(|e| match e {
                    Value::String(s) => non_empty(s),
                    Value::Object(_) => first_text(e, MENU_LABEL_KEYS),
                    _ => None,
                })
                .collect(),
            Value::String(summary) => split_menu_summary(summary),
            _ => Vec::new(),
        };
        if !labels.is_empty() {
            return labels;
        }
    }
    Vec::new()
}

pub fn split_menu_summary(summary: &str) -> Vec<String> {
    summary
        .split(", ")
        .map(strip_quantity)
        .filter_map(non_empty)
        .collect()
}

/// Drops trailing quantity annotations: `/1`, ` x2`, `(2개)`.
fn strip_quantity(label: &str) -> &str {
    let mut s = label.trim();
    loop {
        let before = s;

        if let Some(inner) = s.strip_suffix(')') {
            if let Some(open) = inner.rfind('(') {
                let qty = inner[open + 1..].trim().trim_end_matches('개').trim();
                if is_count(qty) {
                    s = inner[..open].trim_end();
                }
            }
        }

        let head = s.trim_end_matches(|c: char| c.is_ascii_digit());
        if head.len() < s.len() {
            let head = head.trim_end();
            if let Some(rest) = head.strip_suffix('/') {
                s = rest.trim_end();
            } else if let Some(rest) = head.strip_suffix(|c: char| matches!(c, 'x' | 'X' | '×')) {
                if rest.ends_with(char::is_whitespace) {
                    s = rest.trim_end();
                }
            }
        }

        if s == before {
            return s;
        }
    }
}

fn is_count(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn images(item: &Value, table: &FieldTable) -> Vec<ReviewImage> {
    for v in candidates(item, table.images) {
        let Value::Array(entries) = v else { continue };
        let urls: Vec<ReviewImage> = entries
            .iter()
            .filter_map(|e| match e {
                Value::String(s) => non_empty(s),
                Value::Object(_) => first_text(e, IMAGE_URL_KEYS),
                _ => None,
            })
            .map(|url| ReviewImage {
                url: absolute_url(table.asset_base, &url),
            })
            .collect();
        if !urls.is_empty() {
            return urls;
        }
    }
    Vec::new()
}

pub fn absolute_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

fn reply(item: &Value, keys: &[&str]) -> Option<String> {
    candidates(item, keys).find_map(|v| match v {
        Value::String(s) => non_empty(s),
        Value::Array(entries) => entries.first().and_then(reply_text),
        Value::Object(_) => reply_text(v),
        _ => None,
    })
}

fn reply_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => non_empty(s),
        Value::Object(_) => first_text(v, REPLY_TEXT_KEYS),
        _ => None,
    }
}

fn written_at(item: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    candidates(item, keys).find_map(|v| match v {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    })
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    // Anything past year ~2286 in seconds is really milliseconds.
    if n.unsigned_abs() >= 10_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y%m%d%H%M%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d", "%Y.%m.%d.", "%Y%m%d"];

/// Offset-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(day) = NaiveDate::parse_from_str(s, fmt) {
            return day.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
