//! Dual-format codec for the order ledger field.
//!
//! Every order carries one opaque text column that encodes its delivery line
//! items and pricing metadata. Three shapes exist in the wild: empty,
//! structured (a versioned JSON object), and a legacy free-text form with
//! Korean field labels that predates the structured encoding. Decoding is
//! infallible: anything that is not valid structured JSON is scraped with the
//! legacy label patterns, and text matching neither degrades to an empty
//! ledger. Encoding always emits the structured shape, so any re-saved order
//! is permanently upgraded (the legacy form is read-only).

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::AcquisitionMode;

/// Literal substring in the notes that marks prices as tax-inclusive. There
/// is no structured boolean for this; the marker is the only signal.
pub const TAX_INCLUDED_MARKER: &str = "세금포함";

/// One delivery destination within an order. Items live only inside the
/// ledger text; every write replaces the full list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corporation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corporation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    /// Per-item override of the order-level acquisition mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquisition_mode: Option<AcquisitionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_company_id: Option<Uuid>,
    #[serde(default = "default_kiosk_count")]
    pub kiosk_count: i32,
    pub plate_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_delivery_date: Option<chrono::NaiveDate>,
}

fn default_kiosk_count() -> i32 {
    1
}

impl LedgerItem {
    pub fn with_branch(branch_id: Option<Uuid>, kiosk_count: i32) -> Self {
        Self {
            branch_id,
            kiosk_count,
            ..Self::default()
        }
    }
}

/// Order-level pricing metadata carried alongside the items.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LedgerMetadata {
    pub kiosk_unit_price: Option<Decimal>,
    pub plate_unit_price: Option<Decimal>,
    pub total_plate_count: Option<i32>,
    /// Kept opaque: legacy texts carry free-form dates.
    pub order_request_date: Option<String>,
    pub tax_included: bool,
}

/// The structured (JSON object) shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredLedger {
    pub notes: String,
    pub metadata: LedgerMetadata,
    pub items: Vec<LedgerItem>,
}

/// The legacy free-text shape. Read-only: items are never recoverable from
/// it; callers reconstruct them from the order's synthetic assets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyLedger {
    pub raw: String,
    pub requester_name: Option<String>,
    pub metadata: LedgerMetadata,
}

/// Decoded view of the ledger column.
#[derive(Clone, Debug, PartialEq)]
pub enum Ledger {
    Empty,
    Structured(StructuredLedger),
    Legacy(LegacyLedger),
}

/// Wire form of the structured shape. Field names are part of the persisted
/// format and must not change.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StructuredWire<'a> {
    notes: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kiosk_unit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plate_unit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_plate_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_request_date: Option<&'a str>,
    items: &'a [LedgerItem],
}

static LEGACY_REQUESTER: Lazy<Regex> = Lazy::new(|| legacy_label("의뢰자"));
static LEGACY_KIOSK_PRICE: Lazy<Regex> = Lazy::new(|| legacy_label("키오스크단가"));
static LEGACY_PLATE_PRICE: Lazy<Regex> = Lazy::new(|| legacy_label("철판단가"));
static LEGACY_PLATE_COUNT: Lazy<Regex> = Lazy::new(|| legacy_label("철판수량"));
static LEGACY_REQUEST_DATE: Lazy<Regex> = Lazy::new(|| legacy_label("주문요청일"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9][0-9,]*").expect("number pattern"));

fn legacy_label(label: &str) -> Regex {
    // `label:` (ASCII or full-width colon) followed by the rest of the line.
    Regex::new(&format!(r"(?m)^[ \t]*{label}[ \t]*[:：][ \t]*(.+)$")).expect("legacy label pattern")
}

impl Ledger {
    /// Decodes the raw ledger column. Never fails: unparseable input degrades
    /// shape by shape down to an empty ledger.
    pub fn decode(raw: Option<&str>) -> Ledger {
        let raw = match raw {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ledger::Empty,
        };

        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => Ledger::Structured(decode_structured(&object)),
            // Valid JSON but not an object (bare string/number/array) is
            // treated like any other free text.
            _ => Ledger::Legacy(decode_legacy(raw)),
        }
    }

    /// Encodes as the structured shape. `metadata.tax_included` is persisted
    /// through the marker substring in the notes: appended when set, stripped
    /// when cleared.
    pub fn encode(notes: &str, metadata: &LedgerMetadata, items: &[LedgerItem]) -> String {
        let notes = if metadata.tax_included {
            if notes.contains(TAX_INCLUDED_MARKER) {
                notes.to_string()
            } else if notes.is_empty() {
                TAX_INCLUDED_MARKER.to_string()
            } else {
                format!("{notes}\n{TAX_INCLUDED_MARKER}")
            }
        } else {
            strip_tax_marker(notes)
        };

        let wire = StructuredWire {
            notes: &notes,
            kiosk_unit_price: metadata.kiosk_unit_price,
            plate_unit_price: metadata.plate_unit_price,
            total_plate_count: metadata.total_plate_count,
            order_request_date: metadata.order_request_date.as_deref(),
            items,
        };
        serde_json::to_string(&wire).unwrap_or_else(|e| {
            debug!(error = %e, "ledger serialization failed, persisting empty object");
            "{}".to_string()
        })
    }

    pub fn notes(&self) -> &str {
        match self {
            Ledger::Empty => "",
            Ledger::Structured(s) => &s.notes,
            Ledger::Legacy(l) => &l.raw,
        }
    }

    /// Free text worth carrying when the ledger is re-encoded: for the
    /// structured shape this is the notes as stored; for the legacy shape it
    /// is the raw text minus the scraped label lines and the bare tax-marker
    /// line, both of which re-encode from the metadata.
    pub fn residual_notes(&self) -> String {
        match self {
            Ledger::Legacy(l) => legacy_residual(&l.raw),
            _ => self.notes().to_string(),
        }
    }

    pub fn metadata(&self) -> LedgerMetadata {
        match self {
            Ledger::Empty => LedgerMetadata::default(),
            Ledger::Structured(s) => s.metadata.clone(),
            Ledger::Legacy(l) => l.metadata.clone(),
        }
    }

    pub fn items(&self) -> &[LedgerItem] {
        match self {
            Ledger::Structured(s) => &s.items,
            _ => &[],
        }
    }

    /// Requester name is only recoverable from the legacy shape; structured
    /// orders carry it as a proper column.
    pub fn requester_name(&self) -> Option<&str> {
        match self {
            Ledger::Legacy(l) => l.requester_name.as_deref(),
            _ => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Ledger::Legacy(_))
    }
}

fn decode_structured(object: &serde_json::Map<String, Value>) -> StructuredLedger {
    let notes = object
        .get("notes")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let items = match object.get("items") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(item) => Some(item),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable ledger item");
                    None
                }
            })
            .collect(),
        // Missing or non-array items field: no items recoverable, not an error.
        Some(other) => {
            debug!(kind = %json_kind(other), "ledger items field is not an array");
            Vec::new()
        }
        None => Vec::new(),
    };

    let metadata = LedgerMetadata {
        kiosk_unit_price: object.get("kioskUnitPrice").and_then(lenient_decimal),
        plate_unit_price: object.get("plateUnitPrice").and_then(lenient_decimal),
        total_plate_count: object.get("totalPlateCount").and_then(lenient_i32),
        order_request_date: object.get("orderRequestDate").and_then(lenient_string),
        tax_included: notes.contains(TAX_INCLUDED_MARKER),
    };

    StructuredLedger {
        notes,
        metadata,
        items,
    }
}

fn decode_legacy(raw: &str) -> LegacyLedger {
    let requester_name = capture_line(&LEGACY_REQUESTER, raw);
    let metadata = LedgerMetadata {
        kiosk_unit_price: capture_line(&LEGACY_KIOSK_PRICE, raw)
            .as_deref()
            .and_then(parse_money),
        plate_unit_price: capture_line(&LEGACY_PLATE_PRICE, raw)
            .as_deref()
            .and_then(parse_money),
        total_plate_count: capture_line(&LEGACY_PLATE_COUNT, raw)
            .as_deref()
            .and_then(parse_count),
        order_request_date: capture_line(&LEGACY_REQUEST_DATE, raw),
        tax_included: raw.contains(TAX_INCLUDED_MARKER),
    };

    if requester_name.is_none()
        && metadata.kiosk_unit_price.is_none()
        && metadata.plate_unit_price.is_none()
        && metadata.total_plate_count.is_none()
        && metadata.order_request_date.is_none()
        && !metadata.tax_included
    {
        debug!("ledger text matched no known shape, degrading to empty fields");
    }

    LegacyLedger {
        raw: raw.trim().to_string(),
        requester_name,
        metadata,
    }
}

/// Removes every marker occurrence; lines holding nothing but the marker are
/// dropped outright.
fn strip_tax_marker(notes: &str) -> String {
    if !notes.contains(TAX_INCLUDED_MARKER) {
        return notes.to_string();
    }
    notes
        .lines()
        .filter_map(|line| {
            let stripped = line.replace(TAX_INCLUDED_MARKER, "");
            if stripped.trim().is_empty() {
                None
            } else {
                Some(stripped.trim_end().to_string())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lines of a legacy ledger that the label scrapers did not claim.
fn legacy_residual(raw: &str) -> String {
    let labels = [
        &LEGACY_REQUESTER,
        &LEGACY_KIOSK_PRICE,
        &LEGACY_PLATE_PRICE,
        &LEGACY_PLATE_COUNT,
        &LEGACY_REQUEST_DATE,
    ];
    raw.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && *line != TAX_INCLUDED_MARKER
                && !labels.iter().any(|pattern| pattern.is_match(line))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn capture_line(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parses a monetary amount with optional thousands separators, ignoring any
/// trailing unit suffix (`10,000원` → 10000).
fn parse_money(text: &str) -> Option<Decimal> {
    let digits = NUMBER.find(text)?.as_str().replace(',', "");
    digits.parse().ok()
}

fn parse_count(text: &str) -> Option<i32> {
    let digits = NUMBER.find(text)?.as_str().replace(',', "");
    digits.parse().ok()
}

fn lenient_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(_) => serde_json::from_value(value.clone()).ok(),
        Value::String(s) => parse_money(s),
        _ => None,
    }
}

fn lenient_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_items() -> Vec<LedgerItem> {
        vec![
            LedgerItem {
                corporation_id: Some(Uuid::new_v4()),
                corporation_name: Some("한빛상사".to_string()),
                branch_id: Some(Uuid::new_v4()),
                branch_name: Some("강남점".to_string()),
                brand_name: Some("BurgerHub".to_string()),
                postal_code: Some("06236".to_string()),
                address: Some("서울 강남구 테헤란로 1".to_string()),
                contact_phone: Some("02-555-0101".to_string()),
                acquisition_mode: Some(AcquisitionMode::LeaseFree),
                lease_company_id: Some(Uuid::new_v4()),
                kiosk_count: 3,
                plate_count: 2,
                desired_delivery_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 14),
            },
            LedgerItem::with_branch(Some(Uuid::new_v4()), 1),
        ]
    }

    #[test]
    fn empty_and_blank_decode_to_empty() {
        assert_eq!(Ledger::decode(None), Ledger::Empty);
        assert_eq!(Ledger::decode(Some("")), Ledger::Empty);
        assert_eq!(Ledger::decode(Some("   \n ")), Ledger::Empty);
    }

    #[test]
    fn structured_round_trip() {
        let metadata = LedgerMetadata {
            kiosk_unit_price: Some(dec!(1000)),
            plate_unit_price: Some(dec!(200)),
            total_plate_count: Some(3),
            order_request_date: Some("2025-03-01".to_string()),
            tax_included: false,
        };
        let items = sample_items();
        let encoded = Ledger::encode("설치 전 연락 요망", &metadata, &items);

        match Ledger::decode(Some(&encoded)) {
            Ledger::Structured(decoded) => {
                assert_eq!(decoded.notes, "설치 전 연락 요망");
                assert_eq!(decoded.metadata, metadata);
                assert_eq!(decoded.items, items);
            }
            other => panic!("expected structured ledger, got {other:?}"),
        }
    }

    #[test]
    fn tax_marker_survives_round_trip() {
        let metadata = LedgerMetadata {
            tax_included: true,
            ..LedgerMetadata::default()
        };
        let encoded = Ledger::encode("비고 없음", &metadata, &[]);
        let decoded = Ledger::decode(Some(&encoded));
        assert!(decoded.metadata().tax_included);
        assert!(decoded.notes().contains(TAX_INCLUDED_MARKER));

        // Marker already present: not duplicated.
        let encoded_again =
            Ledger::encode(decoded.notes(), &decoded.metadata(), decoded.items());
        assert_eq!(
            encoded_again.matches(TAX_INCLUDED_MARKER).count(),
            1,
            "marker must not be appended twice"
        );
    }

    #[test]
    fn clearing_the_tax_flag_strips_the_marker() {
        let metadata = LedgerMetadata {
            tax_included: true,
            ..LedgerMetadata::default()
        };
        let encoded = Ledger::encode("설치 전 연락 요망", &metadata, &[]);
        let decoded = Ledger::decode(Some(&encoded));
        assert!(decoded.metadata().tax_included);

        let cleared = LedgerMetadata {
            tax_included: false,
            ..decoded.metadata()
        };
        let re_encoded = Ledger::encode(decoded.notes(), &cleared, decoded.items());
        assert!(!re_encoded.contains(TAX_INCLUDED_MARKER));
        let reread = Ledger::decode(Some(&re_encoded));
        assert!(!reread.metadata().tax_included);
        assert_eq!(reread.notes(), "설치 전 연락 요망");
    }

    #[test]
    fn residual_notes_keep_unscraped_legacy_text() {
        let raw = "의뢰자: Kim\n키오스크단가: 10,000\n설치시 2층 엘리베이터 없음 주의\n세금포함";
        let ledger = Ledger::decode(Some(raw));
        assert_eq!(ledger.residual_notes(), "설치시 2층 엘리베이터 없음 주의");

        // Structured and empty shapes pass notes through unchanged.
        let structured = Ledger::decode(Some(r#"{"notes":"그대로","items":[]}"#));
        assert_eq!(structured.residual_notes(), "그대로");
        assert_eq!(Ledger::decode(None).residual_notes(), "");
    }

    #[test]
    fn legacy_text_recovers_labeled_fields() {
        let raw = "의뢰자: Kim\n키오스크단가: 10,000\n철판수량: 2\n세금포함";
        match Ledger::decode(Some(raw)) {
            Ledger::Legacy(legacy) => {
                assert_eq!(legacy.requester_name.as_deref(), Some("Kim"));
                assert_eq!(legacy.metadata.kiosk_unit_price, Some(dec!(10000)));
                assert_eq!(legacy.metadata.total_plate_count, Some(2));
                assert_eq!(legacy.metadata.plate_unit_price, None);
                assert!(legacy.metadata.tax_included);
            }
            other => panic!("expected legacy ledger, got {other:?}"),
        }
        assert!(Ledger::decode(Some(raw)).items().is_empty());
    }

    #[test]
    fn legacy_full_width_colon_and_suffixes() {
        let raw = "키오스크단가： 1,234,000원\n주문요청일: 3월 둘째 주\n철판단가: 50,000원";
        let ledger = Ledger::decode(Some(raw));
        let metadata = ledger.metadata();
        assert_eq!(metadata.kiosk_unit_price, Some(dec!(1234000)));
        assert_eq!(metadata.plate_unit_price, Some(dec!(50000)));
        assert_eq!(metadata.order_request_date.as_deref(), Some("3월 둘째 주"));
    }

    #[test]
    fn arbitrary_text_degrades_without_error() {
        for garbage in [
            "not a ledger at all",
            "{{{{",
            "[1, 2, 3]",
            "\"just a string\"",
            "42",
            "의뢰자없음",
        ] {
            let ledger = Ledger::decode(Some(garbage));
            assert!(ledger.items().is_empty());
            assert_eq!(ledger.metadata().kiosk_unit_price, None);
        }
    }

    #[test]
    fn json_object_with_bad_items_field_is_lenient() {
        let raw = r#"{"notes":"hello","items":"oops","kioskUnitPrice":500}"#;
        match Ledger::decode(Some(raw)) {
            Ledger::Structured(decoded) => {
                assert!(decoded.items.is_empty());
                assert_eq!(decoded.metadata.kiosk_unit_price, Some(dec!(500)));
            }
            other => panic!("expected structured ledger, got {other:?}"),
        }

        let raw = r#"{"items":[{"kioskCount":2},{"kioskCount":"broken"}]}"#;
        let ledger = Ledger::decode(Some(raw));
        assert_eq!(ledger.items().len(), 1);
        assert_eq!(ledger.items()[0].kiosk_count, 2);
    }

    #[test]
    fn item_defaults_apply() {
        let raw = r#"{"items":[{}]}"#;
        let ledger = Ledger::decode(Some(raw));
        assert_eq!(ledger.items()[0].kiosk_count, 1);
        assert_eq!(ledger.items()[0].plate_count, 0);
    }

    #[test]
    fn string_prices_in_structured_shape_are_accepted() {
        let raw = r#"{"kioskUnitPrice":"1,000","totalPlateCount":"3"}"#;
        let metadata = Ledger::decode(Some(raw)).metadata();
        assert_eq!(metadata.kiosk_unit_price, Some(dec!(1000)));
        assert_eq!(metadata.total_plate_count, Some(3));
    }
}
