use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use time::{Date, OffsetDateTime};

use crate::dates::{normalize_calendar_date, parse_iso_date};
use crate::envelope::{UnwrappedPayload, unwrap_envelope};
use crate::GatewayResult;
use crate::error::GatewayError;
use crate::fields::{FieldAlias, extract};
use crate::ports::upstream::{SubService, UpstreamPort};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenceLookup {
    pub licence_number: String,
    pub date_of_birth: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenceCategory {
    pub licence_number: Option<String>,
    pub application_number: Option<String>,
    pub cov_issue_date: Option<String>,
    pub cov_office_name: Option<String>,
    pub vehicle_type_abbr: Option<String>,
    pub vehicle_type_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenceRecord {
    pub dl_number: String,
    pub dob: String,
    pub full_name: Option<String>,
    pub blood_group: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub gender: Option<String>,
    pub bio_id: Option<String>,
    pub issued_at: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub licence_status: Option<String>,
    pub rto_name: Option<String>,
    pub rto_code: Option<String>,
    pub categories: Vec<LicenceCategory>,
}

const fn alias(field: &'static str, aliases: &'static [&'static str]) -> FieldAlias {
    FieldAlias { field, aliases }
}

pub const LICENCE_FIELDS: &[FieldAlias] = &[
    alias("licence_status", &["dlStatus", "dl_status"]),
    alias("valid_to", &["dlNtValdtoDt", "dlNtValdToDt"]),
    alias("valid_from", &["dlNtValdfrDt", "dlNtValdFrDt"]),
    alias("issued_at", &["dlIssuedt", "dlIssueDt"]),
    alias("bio_id", &["bioid", "bioId"]),
    alias("rto_name", &["omRtoFullname", "dlRtoName"]),
    alias("rto_code", &["dlRtoCode"]),
];

pub const HOLDER_FIELDS: &[FieldAlias] = &[
    alias("full_name", &["bioFullName", "bioFirstName"]),
    alias("blood_group", &["bioBloodGroup", "bioBloodGroupname"]),
    alias("address_line_1", &["bioPermAdd1"]),
    alias("address_line_2", &["bioPermAdd2"]),
    alias("gender", &["bioGenderDesc", "bioGender"]),
];

pub const CATEGORY_FIELDS: &[FieldAlias] = &[
    alias("licence_number", &["dcLicno"]),
    alias("application_number", &["dcApplno"]),
    alias("cov_issue_date", &["dcIssuedt"]),
    alias("cov_office_name", &["olaName"]),
    alias("vehicle_type_abbr", &["covabbrv"]),
    alias("vehicle_type_description", &["covdesc"]),
];

pub fn map_licence(
    payload: UnwrappedPayload,
    lookup: &LicenceLookup,
    today: Date,
) -> GatewayResult<LicenceRecord> {
    let root = payload.into_object("licence")?;
    let details = match root.get("dldetobj") {
        Some(Value::Array(items)) => match items.first() {
            Some(first) => object_or_empty(Some(first), "dldetobj[0]")?,
            None => Map::new(),
        },
        other => object_or_empty(other, "dldetobj")?,
    };
    let holder = object_or_empty(details.get("bioObj"), "bioObj")?;
    let licence = object_or_empty(details.get("dlobj"), "dlobj")?;

    let licence_values = extract(&licence, LICENCE_FIELDS);
    let holder_values = extract(&holder, HOLDER_FIELDS);
    let date = |field: &str| licence_values.map(field, normalize_calendar_date);

    let record = LicenceRecord {
        dl_number: lookup.licence_number.clone(),
        dob: lookup.date_of_birth.clone(),
        full_name: holder_values.get("full_name"),
        blood_group: holder_values.get("blood_group"),
        address_line_1: holder_values.get("address_line_1"),
        address_line_2: holder_values.get("address_line_2"),
        gender: holder_values.get("gender"),
        bio_id: licence_values.get("bio_id"),
        issued_at: date("issued_at"),
        valid_from: date("valid_from"),
        valid_to: date("valid_to"),
        licence_status: licence_values.get("licence_status"),
        rto_name: licence_values.get("rto_name"),
        rto_code: licence_values.get("rto_code"),
        categories: dedupe_categories(map_categories(details.get("dlcovs"))?),
    };

    enforce_licence_validity(&record, today)?;
    Ok(record)
}

/// A licence is only returned while it is active and its validity end date
/// lies strictly after `today`.
pub fn enforce_licence_validity(record: &LicenceRecord, today: Date) -> GatewayResult<()> {
    let active = record
        .licence_status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case("active"));
    if !active {
        return Err(GatewayError::BusinessRule(
            "Licence is not active".to_string(),
        ));
    }

    let Some(valid_to) = record.valid_to.as_deref() else {
        return Err(GatewayError::BusinessRule(
            "Licence validity end date missing".to_string(),
        ));
    };

    match parse_iso_date(valid_to) {
        Some(valid_to) if valid_to > today => Ok(()),
        _ => Err(GatewayError::BusinessRule("Licence has expired".to_string())),
    }
}

/// Drops categories repeating an earlier (licence number, abbreviation,
/// description) triple, keeping first-occurrence order.
pub fn dedupe_categories(categories: Vec<LicenceCategory>) -> Vec<LicenceCategory> {
    let mut seen = HashSet::new();
    categories
        .into_iter()
        .filter(|category| {
            seen.insert((
                category.licence_number.clone(),
                category.vehicle_type_abbr.clone(),
                category.vehicle_type_description.clone(),
            ))
        })
        .collect()
}

fn map_categories(raw: Option<&Value>) -> GatewayResult<Vec<LicenceCategory>> {
    let entries: Vec<&Value> = match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) if single.is_object() => vec![single],
        Some(_) => return Err(GatewayError::bad_response("dlcovs has unexpected shape")),
    };

    entries
        .into_iter()
        .map(|entry| {
            let Value::Object(cov) = entry else {
                return Err(GatewayError::bad_response("dlcovs entry is not an object"));
            };
            let values = extract(cov, CATEGORY_FIELDS);
            Ok(LicenceCategory {
                licence_number: values.get("licence_number"),
                application_number: values.get("application_number"),
                cov_issue_date: values.map("cov_issue_date", normalize_calendar_date),
                cov_office_name: values.get("cov_office_name"),
                vehicle_type_abbr: values.get("vehicle_type_abbr"),
                vehicle_type_description: values.get("vehicle_type_description"),
            })
        })
        .collect()
}

fn object_or_empty(value: Option<&Value>, name: &str) -> GatewayResult<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(GatewayError::bad_response(format!(
            "{name} is not an object"
        ))),
    }
}

pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

#[derive(Clone)]
pub struct LicenceService {
    upstream: Arc<dyn UpstreamPort>,
    today: fn() -> Date,
}

impl LicenceService {
    pub fn new(upstream: Arc<dyn UpstreamPort>) -> Self {
        Self {
            upstream,
            today: today_utc,
        }
    }

    pub fn with_today(mut self, today: fn() -> Date) -> Self {
        self.today = today;
        self
    }

    pub async fn fetch_licence_details(
        &self,
        lookup: &LicenceLookup,
    ) -> GatewayResult<LicenceRecord> {
        let raw = self
            .upstream
            .call(
                SubService::Licence,
                json!({ "dlnumber": lookup.licence_number, "dob": lookup.date_of_birth }),
                &lookup.request_id,
            )
            .await?;
        let payload = unwrap_envelope(&raw)?;
        let record = map_licence(payload, lookup, (self.today)());
        if let Err(err) = &record
            && matches!(err, GatewayError::BusinessRule(_))
        {
            tracing::info!(
                request_id = %lookup.request_id,
                reason = %err,
                "licence rejected by validity rules"
            );
        }
        record
    }
}
