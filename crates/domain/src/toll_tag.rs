use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::envelope::{UnwrappedPayload, unwrap_envelope};
use crate::GatewayResult;
use crate::error::GatewayError;
use crate::fields::{FieldAlias, FieldMap, extract, pick_first, scalar_text};
use crate::ports::upstream::{SubService, UpstreamPort};

const ENTRY_NAME_KEYS: &[&str] = &["name", "Name", "key"];
const ENTRY_VALUE_KEYS: &[&str] = &["value", "Value"];
const DETAIL_LIST_KEYS: &[&str] = &["tagDetails", "details", "data"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TollTagLookup {
    pub vehicle_number: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TollTagTransaction {
    pub reader_read_time: Option<String>,
    pub seq_no: Option<String>,
    pub lane_direction: Option<String>,
    pub toll_plaza_geocode: Option<String>,
    pub toll_plaza_name: Option<String>,
    pub vehicle_type: Option<String>,
    pub vehicle_reg_no: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TollTagVehicle {
    pub err_code: Option<String>,
    pub total_tags_in_msg: Option<String>,
    pub msg_num: Option<String>,
    pub total_tags_in_response: Option<String>,
    pub total_msg: Option<String>,
    pub transactions: Vec<TollTagTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TollTagDetail {
    pub tag_id: Option<String>,
    pub tag_status: Option<String>,
    pub issuer_bank: Option<String>,
    pub vehicle_class: Option<String>,
    pub issue_date: Option<String>,
    pub exception_code: Option<String>,
    pub commercial_vehicle: Option<String>,
    pub registration_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TollTagRecord {
    pub vehicle_number: String,
    pub result: Option<String>,
    pub resp_code: Option<String>,
    pub timestamp: Option<String>,
    pub vehicle: TollTagVehicle,
    pub tag: TollTagDetail,
}

/// Transaction-history half of a toll-tag lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionHistory {
    pub result: Option<String>,
    pub resp_code: Option<String>,
    pub timestamp: Option<String>,
    pub vehicle: TollTagVehicle,
}

const fn alias(field: &'static str, aliases: &'static [&'static str]) -> FieldAlias {
    FieldAlias { field, aliases }
}

pub const HISTORY_FIELDS: &[FieldAlias] = &[
    alias("result", &["result"]),
    alias("respCode", &["respCode", "responseCode"]),
    alias("timestamp", &["ts", "timestamp"]),
];

pub const TXN_LIST_FIELDS: &[FieldAlias] = &[
    alias("totalTagsInMsg", &["totalTagsInMsg"]),
    alias("msgNum", &["msgNum"]),
    alias("totalTagsInResponse", &["totalTagsInresponse", "totalTagsInResponse"]),
    alias("totalMsg", &["totalMsg"]),
];

pub const TXN_FIELDS: &[FieldAlias] = &[
    alias("readerReadTime", &["readerReadTime"]),
    alias("seqNo", &["seqNo"]),
    alias("laneDirection", &["laneDirection"]),
    alias("tollPlazaGeocode", &["tollPlazaGeocode"]),
    alias("tollPlazaName", &["tollPlazaName"]),
    alias("vehicleType", &["vehicleType"]),
    alias("vehicleRegNo", &["vehicleRegNo"]),
];

pub const TAG_DETAIL_FIELDS: &[FieldAlias] = &[
    alias("tagId", &["TAGID", "tagId", "tag_id"]),
    alias("tagStatus", &["TAGSTATUS", "tagStatus", "tag_status"]),
    alias("issuerBank", &["BANKID", "issuerBank", "bankName"]),
    alias("vehicleClass", &["VEHICLECLASS", "vehicleClass", "vehicle_class"]),
    alias("issueDate", &["ISSUEDATE", "issueDate", "issue_date"]),
    alias("exceptionCode", &["EXCCODE", "exceptionCode", "exception_code"]),
    alias("commercialVehicle", &["COMVEHICLE", "commercialVehicle"]),
    alias(
        "registrationNumber",
        &["REGNUMBER", "vehicleRegNo", "regNumber", "vehicleNumber"],
    ),
];

pub fn map_transaction_history(
    payload: UnwrappedPayload,
) -> GatewayResult<TransactionHistory> {
    let root = payload.into_object("toll-tag transaction")?;
    let header = extract(&root, HISTORY_FIELDS);

    let vehicle = object_or_empty(root.get("vehicle"));
    let txn_list = object_or_empty(vehicle.get("vehltxnList"));
    let list_values = extract(&txn_list, TXN_LIST_FIELDS);

    let transactions = match txn_list.get("txn") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(map_transaction)
            .collect::<Result<Vec<_>, _>>()?,
        Some(single) => vec![map_transaction(single)?],
    };

    Ok(TransactionHistory {
        result: header.get("result"),
        resp_code: header.get("respCode"),
        timestamp: header.get("timestamp"),
        vehicle: TollTagVehicle {
            err_code: vehicle.get("errCode").and_then(scalar_text),
            total_tags_in_msg: list_values.get("totalTagsInMsg"),
            msg_num: list_values.get("msgNum"),
            total_tags_in_response: list_values.get("totalTagsInResponse"),
            total_msg: list_values.get("totalMsg"),
            transactions,
        },
    })
}

fn map_transaction(raw: &Value) -> GatewayResult<TollTagTransaction> {
    let Value::Object(txn) = raw else {
        return Err(GatewayError::bad_response("toll-tag txn entry is not an object"));
    };
    let values = extract(txn, TXN_FIELDS);
    Ok(TollTagTransaction {
        reader_read_time: values.get("readerReadTime"),
        seq_no: values.get("seqNo"),
        lane_direction: values.get("laneDirection"),
        toll_plaza_geocode: values.get("tollPlazaGeocode"),
        toll_plaza_name: values.get("tollPlazaName"),
        vehicle_type: values.get("vehicleType"),
        vehicle_reg_no: values.get("vehicleRegNo"),
    })
}

/// Folds the detail sub-service's `[{ name, value }, ...]` list into a map.
///
/// The list may be the payload itself or sit under a `tagDetails`, `details`
/// or `data` member. Entries without a name are skipped; a repeated name
/// keeps its first value.
pub fn fold_name_value_list(payload: UnwrappedPayload) -> GatewayResult<FieldMap> {
    let entries = match payload {
        UnwrappedPayload::Array(items) => items,
        UnwrappedPayload::Object(map) => DETAIL_LIST_KEYS
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(Value::Array(items)) => Some(items.clone()),
                _ => None,
            })
            .ok_or_else(|| GatewayError::bad_response("toll-tag detail list missing"))?,
        UnwrappedPayload::Text(_) => {
            return Err(GatewayError::bad_response(
                "expected toll-tag detail list, got text",
            ));
        }
    };

    let mut fields = FieldMap::new();
    for entry in &entries {
        let Value::Object(entry) = entry else {
            return Err(GatewayError::bad_response(
                "toll-tag detail entry is not an object",
            ));
        };
        let Some(name) = pick_first(entry, ENTRY_NAME_KEYS) else {
            continue;
        };
        if let Some(value) = pick_first(entry, ENTRY_VALUE_KEYS) {
            fields.entry(name).or_insert(value);
        }
    }
    Ok(fields)
}

pub fn map_tag_detail(fields: &FieldMap) -> TollTagDetail {
    let values = extract(fields, TAG_DETAIL_FIELDS);
    TollTagDetail {
        tag_id: values.get("tagId"),
        tag_status: values.get("tagStatus"),
        issuer_bank: values.get("issuerBank"),
        vehicle_class: values.get("vehicleClass"),
        issue_date: values.get("issueDate"),
        exception_code: values.get("exceptionCode"),
        commercial_vehicle: values.get("commercialVehicle"),
        registration_number: values.get("registrationNumber"),
    }
}

pub fn merge_toll_tag(
    requested_vehicle_number: &str,
    history: TransactionHistory,
    tag: TollTagDetail,
) -> TollTagRecord {
    TollTagRecord {
        vehicle_number: tag
            .registration_number
            .clone()
            .unwrap_or_else(|| requested_vehicle_number.to_string()),
        result: history.result,
        resp_code: history.resp_code,
        timestamp: history.timestamp,
        vehicle: history.vehicle,
        tag,
    }
}

fn object_or_empty(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

#[derive(Clone)]
pub struct TollTagService {
    upstream: Arc<dyn UpstreamPort>,
}

impl TollTagService {
    pub fn new(upstream: Arc<dyn UpstreamPort>) -> Self {
        Self { upstream }
    }

    pub async fn fetch_toll_tag_details(
        &self,
        lookup: &TollTagLookup,
    ) -> GatewayResult<TollTagRecord> {
        let body = json!({ "vehiclenumber": lookup.vehicle_number });
        let (history, detail) = tokio::join!(
            self.upstream.call(
                SubService::TollTagTransactions,
                body.clone(),
                &lookup.request_id
            ),
            self.upstream
                .call(SubService::TollTagDetail, body, &lookup.request_id)
        );

        let history = map_transaction_history(unwrap_envelope(&history?)?)?;
        let fields = fold_name_value_list(unwrap_envelope(&detail?)?)?;
        Ok(merge_toll_tag(
            &lookup.vehicle_number,
            history,
            map_tag_detail(&fields),
        ))
    }
}
