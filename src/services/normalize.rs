use anyhow::{anyhow, Result};
use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::models::{Category, Items, NewExpense};
use crate::utils::parse_decimal;

const DEFAULT_SOURCE: &str = "Webhook/Form";
const DEFAULT_STATUS: &str = "PROCESSED";
const DEFAULT_CURRENCY: &str = "$";

/// Maps whatever the extraction workflow returned onto one [`NewExpense`].
///
/// The workflow answers with either an object or a one-element array, and
/// its field names drift between document categories (`total_amount` vs
/// `total`, `vendor_name` vs `store_name` vs `restaurant_name`). Field
/// lookups follow JavaScript truthiness: `0`, `""`, `null` and missing keys
/// all fall through to the next candidate.
pub fn normalize_webhook_payload(payload: &Value, user_id: &str) -> Result<NewExpense> {
    let expense = match payload {
        Value::Array(entries) => entries
            .first()
            .ok_or_else(|| anyhow!("Workflow returned an empty result"))?,
        other => other,
    };

    validate_shape(expense)?;
    let obj = expense
        .as_object()
        .ok_or_else(|| anyhow!("Workflow result is not an object"))?;

    let subtotal = amount(obj, &["subtotal"]);
    let tax_amount = amount(obj, &["tax_amount", "tax"]);
    let total_amount = first_truthy(obj, &["total_amount", "total"])
        .and_then(as_amount)
        .filter(|total| *total != 0.0)
        .unwrap_or_else(|| subtotal.unwrap_or(0.0) + tax_amount.unwrap_or(0.0));

    Ok(NewExpense {
        user_id: user_id.to_string(),
        category: text(obj, &["category"]).unwrap_or_default().into(),
        source: text(obj, &["source"]).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        status: text(obj, &["status"]).unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        vendor_name: text(obj, &["vendor_name", "store_name", "restaurant_name"]),
        date: text(obj, &["date", "receipt_date"]),
        due_date: text(obj, &["due_date"]),
        receipt_time: text(obj, &["receipt_time", "time"]),
        order_number: text(obj, &["order_number"]),
        server_name: text(obj, &["server_name"]),
        image_url: text(obj, &["image_url"]),
        items: items(obj),
        subtotal,
        tax_amount,
        tip_amount: amount(obj, &["tip_amount", "tip"]),
        total_amount: Some(total_amount),
        currency: text(obj, &["currency", "Currency"])
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        payment_terms: text(obj, &["payment_terms"]),
        tags: tags(obj),
        raw_data: expense.clone(),
    })
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn first_truthy<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| truthy(value))
}

/// Numbers and numeric strings count; anything else is treated as absent.
pub fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s).ok(),
        _ => None,
    }
}

/// `a || b`: the first truthy candidate, otherwise whatever the last key holds.
fn pick<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    first_truthy(obj, keys).or_else(|| keys.last().and_then(|key| obj.get(*key)))
}

fn amount(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    pick(obj, keys).and_then(as_amount)
}

pub fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match first_truthy(obj, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn items(obj: &Map<String, Value>) -> Option<Items> {
    match obj.get("items")? {
        Value::Array(list) => Some(Items::List(list.clone())),
        Value::String(s) if !s.is_empty() => Some(Items::Text(s.clone())),
        _ => None,
    }
}

fn tags(obj: &Map<String, Value>) -> Option<String> {
    match first_truthy(obj, &["tags"])? {
        Value::String(s) => Some(s.clone()),
        Value::Array(list) => {
            let joined = list
                .iter()
                .filter_map(|tag| tag.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn compiled_schema() -> Result<&'static JSONSchema> {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    if let Some(schema) = SCHEMA.get() {
        return Ok(schema);
    }
    let compiled = JSONSchema::compile(&payload_schema())
        .map_err(|e| anyhow!("Invalid payload schema: {}", e))?;
    Ok(SCHEMA.get_or_init(|| compiled))
}

fn validate_shape(value: &Value) -> Result<()> {
    let schema = compiled_schema()?;
    let problems: Vec<String> = match schema.validate(value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    };
    if !problems.is_empty() {
        return Err(anyhow!("Unexpected workflow result: {}", problems.join("; ")));
    }
    Ok(())
}

fn payload_schema() -> Value {
    let amount = json!({"type": ["number", "string", "null"]});
    let label = json!({"type": ["string", "number", "null"]});
    json!({
        "type": "object",
        "properties": {
            "category": {"type": ["string", "null"]},
            "status": label,
            "source": label,
            "vendor_name": label,
            "store_name": label,
            "restaurant_name": label,
            "date": label,
            "receipt_date": label,
            "due_date": label,
            "image_url": {"type": ["string", "null"]},
            "subtotal": amount,
            "tax_amount": amount,
            "tax": amount,
            "tip_amount": amount,
            "total_amount": amount,
            "total": amount,
            "currency": {"type": ["string", "null"]},
            "items": {"type": ["array", "string", "null"]}
        }
    })
}
