//! Mapping of remote FHIR resources into local records
//!
//! Pure functions: the sync engine fetches, these decide what to store.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::models::{LabObservation, MedicalRecord, RECORD_TYPE_LAB, RECORD_TYPE_VISIT};

/// Status stamped on every synced lab; reference ranges are not evaluated
pub const SYNCED_LAB_STATUS: &str = "normal";

/// Who and when a batch of resources is being mapped for
#[derive(Debug, Clone)]
pub struct MappingContext {
    pub patient_id: String,
    pub ehr: String,
    pub now: DateTime<Utc>,
}

impl MappingContext {
    pub fn new(patient_id: impl Into<String>, ehr: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ehr: ehr.into(),
            now,
        }
    }

    /// `FHIR:{ehr}` tag distinguishing synced rows from portal or manual data
    pub fn source_tag(&self) -> String {
        format!("FHIR:{}", self.ehr)
    }

    /// EHR name as shown to the patient, e.g. `Epic`
    pub fn provider(&self) -> String {
        capitalize(&self.ehr)
    }

    fn today(&self) -> String {
        self.now.format("%Y-%m-%d").to_string()
    }
}

/// Uppercase the first character, lowercase the rest
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// `resourceType` of a FHIR JSON resource
pub fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Resources contained in a searchset Bundle's entries
pub fn bundle_resources(bundle: &Value) -> impl Iterator<Item = &Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("resource"))
}

/// `name[0].given` joined, followed by `name[0].family`
pub fn patient_display_name(patient: &Value) -> String {
    let name = patient
        .get("name")
        .and_then(Value::as_array)
        .and_then(|names| names.first());

    let given = name
        .and_then(|n| n.get("given"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let family = name
        .and_then(|n| n.get("family"))
        .and_then(Value::as_str)
        .unwrap_or("");

    format!("{} {}", given, family).trim().to_string()
}

/// Visit record summarizing a remote Patient resource.
///
/// Returns `None` when the resource is not a Patient.
pub fn map_patient(patient: &Value, ctx: &MappingContext) -> Option<MedicalRecord> {
    if resource_type(patient) != Some("Patient") {
        return None;
    }

    let birth_date = patient
        .get("birthDate")
        .and_then(Value::as_str)
        .unwrap_or("N/A");

    Some(MedicalRecord {
        id: None,
        patient_id: ctx.patient_id.clone(),
        record_type: RECORD_TYPE_VISIT.to_string(),
        title: format!("FHIR Patient record ({})", ctx.ehr),
        description: format!(
            "Patient: {}. Birth date: {}.",
            patient_display_name(patient),
            birth_date
        ),
        date: ctx.today(),
        source: ctx.provider(),
        provider: ctx.provider(),
    })
}

/// Lab observation and its matching `lab` record
#[derive(Debug, Clone, PartialEq)]
pub struct MappedObservation {
    pub lab: LabObservation,
    pub record: MedicalRecord,
}

/// Map one Observation.
///
/// `Ok(None)` for non-Observation resources and for observations without a
/// numeric `valueQuantity`; an unparsable `effectiveDateTime` is an error.
pub fn map_observation(resource: &Value, ctx: &MappingContext) -> Result<Option<MappedObservation>> {
    if resource_type(resource) != Some("Observation") {
        return Ok(None);
    }

    let code = resource.get("code");
    let coding = code
        .and_then(|c| c.get("coding"))
        .and_then(Value::as_array)
        .and_then(|codings| codings.first());

    let test_name = coding
        .and_then(|c| c.get("display"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| code.and_then(|c| c.get("text")).and_then(Value::as_str))
        .unwrap_or("Unknown")
        .to_string();

    let loinc = coding
        .and_then(|c| c.get("code"))
        .and_then(Value::as_str)
        .map(String::from);

    let quantity = resource.get("valueQuantity");
    let Some((value, value_text)) = quantity.and_then(|q| q.get("value")).and_then(numeric) else {
        return Ok(None);
    };
    if !value.is_finite() {
        return Err(CoreError::InvalidValue(value_text));
    }
    let unit = quantity
        .and_then(|q| q.get("unit"))
        .and_then(Value::as_str)
        .map(String::from);

    let effective = resource.get("effectiveDateTime").and_then(Value::as_str);
    let (timestamp, date) = match effective {
        Some(raw) => (
            parse_fhir_datetime(raw)?,
            raw.get(..10).unwrap_or(raw).to_string(),
        ),
        None => (ctx.now, ctx.today()),
    };

    let description = format!("{}: {} {}", test_name, value_text, unit.as_deref().unwrap_or(""))
        .trim()
        .to_string();

    let lab = LabObservation {
        id: None,
        patient_id: ctx.patient_id.clone(),
        test_name: test_name.clone(),
        loinc,
        value,
        unit,
        ref_range: reference_range(resource),
        status: SYNCED_LAB_STATUS.to_string(),
        source: ctx.source_tag(),
        timestamp,
    };

    let record = MedicalRecord {
        id: None,
        patient_id: ctx.patient_id.clone(),
        record_type: RECORD_TYPE_LAB.to_string(),
        title: test_name,
        description,
        date,
        source: ctx.source_tag(),
        provider: ctx.provider(),
    };

    Ok(Some(MappedObservation { lab, record }))
}

/// `"{low}-{high}"` from `referenceRange[0]` when either bound is present
pub fn reference_range(resource: &Value) -> Option<String> {
    let range = resource
        .get("referenceRange")
        .and_then(Value::as_array)
        .and_then(|ranges| ranges.first())?;

    let bound = |key: &str| {
        range
            .get(key)
            .and_then(|b| b.get("value"))
            .and_then(numeric)
            .filter(|(v, _)| v.is_finite())
            .map(|(_, text)| text)
    };

    match (bound("low"), bound("high")) {
        (None, None) => None,
        (low, high) => Some(format!(
            "{}-{}",
            low.unwrap_or_default(),
            high.unwrap_or_default()
        )),
    }
}

/// Numeric value and its original textual form.
///
/// Accepts JSON numbers and numeric strings.
fn numeric(value: &Value) -> Option<(f64, String)> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| (v, n.to_string())),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|v| (v, s.trim().to_string())),
        _ => None,
    }
}

/// Parse a FHIR dateTime.
///
/// Accepts RFC 3339 (a trailing `Z` means UTC), a date-time without offset
/// (taken as UTC) and a bare date (midnight UTC).
pub fn parse_fhir_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc());
    }

    Err(CoreError::InvalidTimestamp(raw.to_string()))
}
