use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::dates::normalize_dmy_date;
use crate::envelope::{UnwrappedPayload, unwrap_envelope};
use crate::GatewayResult;
use crate::error::GatewayError;
use crate::fields::{FieldAlias, FieldMap, extract};
use crate::ports::upstream::{SubService, UpstreamPort};

pub const VEHICLE_NOT_FOUND_SENTINEL: &str = "Vehicle Details not Found";
const VEHICLE_DETAILS_ELEMENT: &str = "VehicleDetails";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLookup {
    pub vehicle_number: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub vehicle_number: String,
    pub owner_name: Option<String>,
    pub address: Option<String>,
    pub status: Option<String>,
    pub rc_registration_date: Option<String>,
    pub fitness_certificate_expiry: Option<String>,
    pub insurance_expiry: Option<String>,
    pub tax_expiry: Option<String>,
    pub permit_expiry: Option<String>,
    pub pucc_expiry: Option<String>,
    pub national_permit_expiry: Option<String>,
    pub permit_type: Option<String>,
    pub pucc_number: Option<String>,
    pub permit_number: Option<String>,
    pub insurer: Option<String>,
    pub insurance_number: Option<String>,
    pub financier: Option<String>,
    pub vehicle_class: Option<String>,
    pub body_type: Option<String>,
    pub fuel_type: Option<String>,
    pub chassis_number: Option<String>,
    pub engine_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub norms_type: Option<String>,
    pub vehicle_category: Option<String>,
}

const fn alias(field: &'static str, aliases: &'static [&'static str]) -> FieldAlias {
    FieldAlias { field, aliases }
}

pub const REGISTRY_FIELDS: &[FieldAlias] = &[
    alias("vehicleNumber", &["rc_regn_no", "Regn_no", "registration_number"]),
    alias(
        "ownerName",
        &["rc_owner_name", "Owner_name", "ownerName", "owner_name"],
    ),
    alias(
        "address",
        &["rc_permanent_address", "Permanent_address", "permanent_address"],
    ),
    alias(
        "status",
        &["rc_status", "Status", "vehicleStatus", "rc_status_as_on"],
    ),
    alias(
        "rcRegistrationDate",
        &["rc_regn_dt", "Registration_date", "registrationDate"],
    ),
    alias(
        "fitnessCertificateExpiry",
        &["rc_regn_upto", "Registration_valid_upto", "regn_valid_upto"],
    ),
    alias(
        "insuranceExpiry",
        &["rc_insurance_upto", "Insurance_valid_upto", "insuranceValidTill"],
    ),
    alias("taxExpiry", &["rc_tax_upto", "Tax_valid_upto"]),
    alias(
        "permitExpiry",
        &["rc_permit_valid_upto", "Permit_valid_upto", "rc_permit_upto"],
    ),
    alias(
        "puccExpiry",
        &["rc_pucc_upto", "PUCC_valid_upto", "pucc_valid_upto"],
    ),
    alias(
        "nationalPermitExpiry",
        &["rc_np_upto", "National_permit_valid_upto", "np_valid_upto"],
    ),
    alias("permitType", &["rc_permit_type", "Permit_type", "permit_type"]),
    alias("puccNumber", &["rc_pucc_no", "PUCC_no", "pucc_no"]),
    alias("permitNumber", &["rc_permit_no", "Permit_no", "permit_no"]),
    alias(
        "insurer",
        &["rc_insurance_comp", "Insurance_comp", "insurance_company"],
    ),
    alias(
        "insuranceNumber",
        &[
            "rc_insurance_policy_no",
            "Insurance_policy_no",
            "insurance_policy_no",
        ],
    ),
    alias("financier", &["rc_financer", "Financer", "financier"]),
    alias(
        "vehicleClass",
        &["rc_vh_class_desc", "Vehicle_class_desc", "vehicleClass"],
    ),
    alias("bodyType", &["rc_body_type_desc", "Body_type_desc", "body_type"]),
    alias("fuelType", &["rc_fuel_desc", "Fuel_desc", "fuelType"]),
    alias("chassisNumber", &["rc_chasi_no", "Chasi_no", "chassisNumber"]),
    alias("engineNumber", &["rc_eng_no", "Engine_no", "engineNumber"]),
    alias("manufacturer", &["rc_maker_desc", "Maker_desc", "manufacturer"]),
    alias("model", &["rc_maker_model", "Maker_model", "model"]),
    alias("normsType", &["rc_norms_desc", "Norms_desc", "norms_type"]),
    alias(
        "vehicleCategory",
        &["rc_vch_catg", "Vehicle_category", "vehicle_category"],
    ),
];

/// Child elements of the `VehicleDetails` node as a flat field map.
///
/// The node is the document root or its first descendant with that name;
/// documents without one are read from the root element. Empty elements are
/// skipped and the first occurrence of a repeated element wins.
pub fn parse_vehicle_xml(xml: &str) -> GatewayResult<FieldMap> {
    let document = roxmltree::Document::parse(xml.trim())
        .map_err(|err| GatewayError::bad_response(format!("registry XML rejected: {err}")))?;
    let details = document
        .descendants()
        .find(|node| node.is_element() && node.has_tag_name(VEHICLE_DETAILS_ELEMENT))
        .unwrap_or_else(|| document.root_element());

    let mut fields = FieldMap::new();
    for child in details.children().filter(|node| node.is_element()) {
        let Some(text) = child.text().map(str::trim).filter(|text| !text.is_empty()) else {
            continue;
        };
        fields
            .entry(child.tag_name().name().to_string())
            .or_insert_with(|| text.to_string());
    }
    Ok(fields)
}

pub fn map_registry(
    payload: UnwrappedPayload,
    requested_vehicle_number: &str,
) -> GatewayResult<RegistryRecord> {
    let xml = match payload {
        UnwrappedPayload::Text(text) if text.trim() == VEHICLE_NOT_FOUND_SENTINEL => {
            return Err(GatewayError::NotFound("Vehicle details not found".to_string()));
        }
        UnwrappedPayload::Text(text) => text,
        other => {
            return Err(GatewayError::bad_response(format!(
                "expected registry XML document, got {}",
                other.shape()
            )));
        }
    };

    let fields = parse_vehicle_xml(&xml)?;
    let values = extract(&fields, REGISTRY_FIELDS);
    let date = |field: &str| values.map(field, normalize_dmy_date);

    Ok(RegistryRecord {
        vehicle_number: values
            .get("vehicleNumber")
            .unwrap_or_else(|| requested_vehicle_number.to_string()),
        owner_name: values.get("ownerName"),
        address: values.get("address"),
        status: values.get("status"),
        rc_registration_date: date("rcRegistrationDate"),
        fitness_certificate_expiry: date("fitnessCertificateExpiry"),
        insurance_expiry: date("insuranceExpiry"),
        tax_expiry: date("taxExpiry"),
        permit_expiry: date("permitExpiry"),
        pucc_expiry: date("puccExpiry"),
        national_permit_expiry: date("nationalPermitExpiry"),
        permit_type: values.get("permitType"),
        pucc_number: values.get("puccNumber"),
        permit_number: values.get("permitNumber"),
        insurer: values.get("insurer"),
        insurance_number: values.get("insuranceNumber"),
        financier: values.get("financier"),
        vehicle_class: values.get("vehicleClass"),
        body_type: values.get("bodyType"),
        fuel_type: values.get("fuelType"),
        chassis_number: values.get("chassisNumber"),
        engine_number: values.get("engineNumber"),
        manufacturer: values.get("manufacturer"),
        model: values.get("model"),
        norms_type: values.get("normsType"),
        vehicle_category: values.get("vehicleCategory"),
    })
}

#[derive(Clone)]
pub struct RegistryService {
    upstream: Arc<dyn UpstreamPort>,
}

impl RegistryService {
    pub fn new(upstream: Arc<dyn UpstreamPort>) -> Self {
        Self { upstream }
    }

    pub async fn fetch_registry_details(
        &self,
        lookup: &RegistryLookup,
    ) -> GatewayResult<RegistryRecord> {
        let raw = self
            .upstream
            .call(
                SubService::Registry,
                json!({ "vehiclenumber": lookup.vehicle_number }),
                &lookup.request_id,
            )
            .await?;
        let payload = unwrap_envelope(&raw)?;
        map_registry(payload, &lookup.vehicle_number)
    }
}
