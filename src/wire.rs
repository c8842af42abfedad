//! Transport-boundary normalization.
//!
//! Backends answer with JSON arrays, JSON envelopes (`items`/`data`), or XML
//! documents that wrap every scalar in an element and repeat `<item>` for
//! list entries. Everything is folded into [`Page`] / [`StudentRecord`] here so
//! no other module ever looks at a response shape.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::models::{Page, StudentFields, StudentId, StudentRecord};
use crate::store::StoreError;
use crate::validate::score_in_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Xml,
}

impl BodyFormat {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(value) if value.to_ascii_lowercase().contains("xml") => BodyFormat::Xml,
            _ => BodyFormat::Json,
        }
    }
}

pub fn parse_body(format: BodyFormat, body: &str) -> Result<Value, StoreError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    match format {
        BodyFormat::Json => serde_json::from_str(body).map_err(|e| StoreError::Parse(format!("json: {e}"))),
        BodyFormat::Xml => xml_to_value(body),
    }
}

/// Flattens an XML document into the equivalent JSON value.
pub fn xml_to_value(body: &str) -> Result<Value, StoreError> {
    let document = roxmltree::Document::parse(body).map_err(|e| StoreError::Parse(format!("xml: {e}")))?;
    Ok(element_to_value(document.root_element()))
}

fn element_to_value(node: roxmltree::Node<'_, '_>) -> Value {
    let children: Vec<roxmltree::Node<'_, '_>> = node.children().filter(|child| child.is_element()).collect();

    if children.is_empty() {
        let text: String = node.children().filter_map(|child| child.text()).collect();
        let text = text.trim();
        return if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };
    }

    if children.iter().all(|child| child.tag_name().name() == "item") {
        return Value::Array(children.into_iter().map(element_to_value).collect());
    }

    let mut object = Map::new();
    let mut repeated: HashSet<String> = HashSet::new();
    for child in children {
        let key = child.tag_name().name().to_string();
        let value = element_to_value(child);

        match object.remove(&key) {
            None => {
                object.insert(key, value);
            }
            Some(Value::Array(mut items)) if repeated.contains(&key) => {
                items.push(value);
                object.insert(key, Value::Array(items));
            }
            Some(previous) => {
                repeated.insert(key.clone());
                object.insert(key, Value::Array(vec![previous, value]));
            }
        }
    }
    Value::Object(object)
}

/// Field names used in request bodies. `Vietnamese` matches the pandas-backed
/// API (`ma_so_sv`, `ho`, `ten`, ...); `English` matches the SQL-backed one
/// (`student_code`, `first_name`, `birth_date`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestFields {
    #[default]
    Vietnamese,
    English,
}

impl FromStr for RequestFields {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vi" | "vietnamese" => Ok(RequestFields::Vietnamese),
            "en" | "english" => Ok(RequestFields::English),
            other => Err(format!("unknown request field naming: {other} (expected vi or en)")),
        }
    }
}

/// Request body for create and update. The student code is left out when absent.
pub fn encode_fields(fields: &StudentFields, names: RequestFields) -> Value {
    let date_of_birth = fields.date_of_birth.format("%Y-%m-%d").to_string();
    let (code_key, mut body) = match names {
        RequestFields::Vietnamese => (
            "ma_so_sv",
            json!({
                "ho": fields.last_name,
                "ten": fields.first_name,
                "email": fields.email,
                "ngay_sinh": date_of_birth,
                "que_quan": fields.hometown,
                "diem_toan": fields.math_score,
                "diem_van": fields.literature_score,
                "diem_anh": fields.english_score,
            }),
        ),
        RequestFields::English => (
            "student_code",
            json!({
                "first_name": fields.first_name,
                "last_name": fields.last_name,
                "email": fields.email,
                "birth_date": date_of_birth,
                "hometown": fields.hometown,
                "math_score": fields.math_score,
                "literature_score": fields.literature_score,
                "english_score": fields.english_score,
            }),
        ),
    };

    if let (Some(code), Value::Object(object)) = (&fields.student_code, &mut body) {
        object.insert(code_key.to_string(), Value::String(code.clone()));
    }
    body
}

#[derive(Debug, Deserialize)]
struct WireStudent {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "studentCode", alias = "student_code", alias = "ma_so_sv")]
    student_code: Option<Value>,
    #[serde(default, rename = "firstName", alias = "first_name", alias = "ten")]
    first_name: Option<Value>,
    #[serde(default, rename = "lastName", alias = "last_name", alias = "ho")]
    last_name: Option<Value>,
    #[serde(default)]
    email: Option<Value>,
    #[serde(
        default,
        rename = "dateOfBirth",
        alias = "date_of_birth",
        alias = "birth_date",
        alias = "ngay_sinh"
    )]
    date_of_birth: Option<Value>,
    #[serde(default, alias = "que_quan")]
    hometown: Option<Value>,
    #[serde(default, rename = "mathScore", alias = "math_score", alias = "diem_toan")]
    math_score: Option<Value>,
    #[serde(default, rename = "literatureScore", alias = "literature_score", alias = "diem_van")]
    literature_score: Option<Value>,
    #[serde(default, rename = "englishScore", alias = "english_score", alias = "diem_anh")]
    english_score: Option<Value>,
}

pub fn decode_record(value: Value) -> Result<StudentRecord, StoreError> {
    let value = unwrap_envelope(value);
    let wire: WireStudent =
        serde_json::from_value(value).map_err(|e| StoreError::Parse(format!("student record: {e}")))?;

    let id = match wire.id {
        Some(Value::String(text)) if !text.trim().is_empty() => StudentId::new(text.trim()),
        Some(Value::Number(number)) => StudentId::new(number.to_string()),
        other => return Err(StoreError::Parse(format!("student record has no usable id: {other:?}"))),
    };

    let student_code = Some(text_field("studentCode", wire.student_code)?)
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty());

    Ok(StudentRecord {
        student_code,
        first_name: text_field("firstName", wire.first_name)?,
        last_name: text_field("lastName", wire.last_name)?,
        email: text_field("email", wire.email)?,
        date_of_birth: date_field(wire.date_of_birth)?,
        hometown: text_field("hometown", wire.hometown)?,
        math_score: score_field("mathScore", wire.math_score)?,
        literature_score: score_field("literatureScore", wire.literature_score)?,
        english_score: score_field("englishScore", wire.english_score)?,
        id,
    })
}

/// Write acknowledgements may carry the record or only a status message
/// (`{"error": "", "message": "..."}`); the latter decodes to `None`.
pub fn decode_optional_record(value: Value) -> Result<Option<StudentRecord>, StoreError> {
    let value = unwrap_envelope(value);
    let acknowledgement_only = match &value {
        Value::Null => true,
        Value::Object(object) => {
            !object.contains_key("id") && matches!(object.get("data"), None | Some(Value::Null))
        }
        _ => false,
    };
    if acknowledgement_only {
        Ok(None)
    } else {
        decode_record(value).map(Some)
    }
}

pub fn decode_page(value: Value) -> Result<Page, StoreError> {
    let (items, total) = match value {
        Value::Null => (Vec::new(), None),
        Value::Array(items) => (items, None),
        Value::Object(mut object) => {
            let total = ["totalCount", "total_count", "total"]
                .iter()
                .find_map(|key| object.get(*key).and_then(count_value));
            let items = match ["items", "data"].iter().find_map(|key| object.remove(*key)) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) => Vec::new(),
                // A single XML `<item>` under a wrapper flattens to an object.
                Some(single @ Value::Object(_)) => vec![single],
                Some(other) => return Err(StoreError::Parse(format!("unexpected list payload: {other}"))),
                None => return Err(StoreError::Parse("list response has no items".to_string())),
            };
            (items, total)
        }
        other => return Err(StoreError::Parse(format!("unexpected list response: {other}"))),
    };

    let items = items.into_iter().map(decode_record).collect::<Result<Vec<_>, _>>()?;
    let total_count = total.unwrap_or(items.len());
    Ok(Page { items, total_count })
}

/// Figures reported by a backend's `/statistics` resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatistics {
    pub total_students: usize,
    pub avg_math_score: Option<f64>,
    pub avg_literature_score: Option<f64>,
    pub avg_english_score: Option<f64>,
    pub avg_overall_score: Option<f64>,
}

pub fn decode_statistics(value: Value) -> Result<ServerStatistics, StoreError> {
    let Value::Object(object) = unwrap_envelope(value) else {
        return Err(StoreError::Parse("statistics response is not an object".to_string()));
    };

    let lookup = |keys: &[&str]| keys.iter().find_map(|key| object.get(*key)).cloned();
    let average = |keys: &[&str]| -> Result<Option<f64>, StoreError> {
        match lookup(keys) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => number_value(&value)
                .map(Some)
                .ok_or_else(|| StoreError::Parse(format!("{} is not a number", keys[0]))),
        }
    };

    let total_students = lookup(&["total_students", "totalStudents"])
        .as_ref()
        .and_then(count_value)
        .ok_or_else(|| StoreError::Parse("statistics missing total_students".to_string()))?;

    Ok(ServerStatistics {
        total_students,
        avg_math_score: average(&["avg_diem_toan", "avg_math_score", "avgMathScore"])?,
        avg_literature_score: average(&["avg_diem_van", "avg_literature_score", "avgLiteratureScore"])?,
        avg_english_score: average(&["avg_diem_anh", "avg_english_score", "avgEnglishScore"])?,
        avg_overall_score: average(&["avg_diem_trung_binh", "avg_overall_score", "avgOverallScore"])?,
    })
}

/// `{ "data": {...} }` envelopes carry the payload one level down.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut object) if !object.contains_key("id") && !object.contains_key("total_students") => {
            match object.remove("data") {
                Some(inner @ Value::Object(_)) => inner,
                Some(other) => {
                    object.insert("data".to_string(), other);
                    Value::Object(object)
                }
                None => Value::Object(object),
            }
        }
        other => other,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn count_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().map(|n| n as usize),
        Value::String(text) => text.trim().parse::<usize>().ok(),
        _ => None,
    }
}

fn text_field(name: &str, value: Option<Value>) -> Result<String, StoreError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text),
        Some(Value::Number(number)) => Ok(number.to_string()),
        Some(other) => Err(StoreError::Parse(format!("{name} is not text: {other}"))),
    }
}

fn date_field(value: Option<Value>) -> Result<Option<NaiveDate>, StoreError> {
    let text = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) => text,
        Some(other) => return Err(StoreError::Parse(format!("dateOfBirth is not a date: {other}"))),
    };

    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    // Timestamps keep their date part.
    let date_part = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| StoreError::Parse(format!("dateOfBirth {text:?}: {e}")))
}

fn score_field(name: &str, value: Option<Value>) -> Result<Option<f64>, StoreError> {
    let score = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(value) => number_value(&value)
            .ok_or_else(|| StoreError::Parse(format!("{name} is not a number: {value}")))?,
    };

    if !score_in_range(score) {
        return Err(StoreError::Parse(format!("{name} out of range: {score}")));
    }
    Ok(Some(score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const XML_LIST: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<response>
  <item>
    <id>1</id><ma_so_sv>SV001</ma_so_sv><ho>Nguyen Van</ho><ten>An</ten>
    <email>an.nv@example.com</email><ngay_sinh>2000-01-15</ngay_sinh>
    <que_quan>Ha Noi</que_quan><diem_toan>8.5</diem_toan><diem_van>7.0</diem_van>
    <diem_anh>9.0</diem_anh><diem_trung_binh>8.17</diem_trung_binh>
  </item>
  <item>
    <id>2</id><ho>Tran</ho><ten>Binh</ten><email></email><ngay_sinh></ngay_sinh>
    <que_quan>Hue</que_quan><diem_toan>6</diem_toan><diem_van></diem_van><diem_anh>5.5</diem_anh>
  </item>
</response>"#;

    #[test]
    fn content_type_selects_the_decoder() {
        assert_eq!(BodyFormat::from_content_type(Some("application/xml; charset=utf-8")), BodyFormat::Xml);
        assert_eq!(BodyFormat::from_content_type(Some("text/XML")), BodyFormat::Xml);
        assert_eq!(BodyFormat::from_content_type(Some("application/json")), BodyFormat::Json);
        assert_eq!(BodyFormat::from_content_type(None), BodyFormat::Json);
    }

    #[test]
    fn xml_list_and_json_list_normalize_to_the_same_page() {
        let from_xml = decode_page(xml_to_value(XML_LIST).unwrap()).unwrap();

        let from_json = decode_page(json!([
            {"id": 1, "studentCode": "SV001", "firstName": "An", "lastName": "Nguyen Van", "email": "an.nv@example.com",
             "dateOfBirth": "2000-01-15", "hometown": "Ha Noi",
             "mathScore": 8.5, "literatureScore": 7.0, "englishScore": 9.0},
            {"id": "2", "first_name": "Binh", "last_name": "Tran", "email": null,
             "hometown": "Hue", "math_score": "6", "english_score": 5.5}
        ]))
        .unwrap();

        assert_eq!(from_xml, from_json);
        assert_eq!(from_xml.total_count, 2);
        assert_eq!(from_xml.items[0].id, StudentId::new("1"));
        assert_eq!(from_xml.items[1].literature_score, None);
        assert_eq!(from_xml.items[1].date_of_birth, None);
    }

    #[test]
    fn envelopes_carry_items_and_total() {
        let page = decode_page(json!({
            "items": [{"id": "a", "firstName": "An", "mathScore": 7}],
            "totalCount": 40
        }))
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_count, 40);

        let page = decode_page(json!({"error": "", "message": "ok", "data": []})).unwrap();
        assert_eq!(page, Page::default());
    }

    #[test]
    fn single_xml_item_is_still_a_list() {
        let body = "<response><item><id>9</id><ten>Chi</ten></item></response>";
        let page = decode_page(xml_to_value(body).unwrap()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].first_name, "Chi");

        let empty = decode_page(xml_to_value("<response/>").unwrap()).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn repeated_non_item_siblings_collect_into_arrays() {
        let value = xml_to_value("<r><tag>a</tag><tag>b</tag><tag>c</tag><one>x</one></r>").unwrap();
        assert_eq!(value, json!({"tag": ["a", "b", "c"], "one": "x"}));
    }

    #[test]
    fn single_record_envelope_is_unwrapped() {
        let record = decode_record(json!({"message": "ok", "data": {"id": 3, "firstName": "Dung"}})).unwrap();
        assert_eq!(record.id, StudentId::new("3"));
        assert_eq!(record.first_name, "Dung");
    }

    #[test]
    fn student_code_arrives_under_any_naming() {
        let page = decode_page(xml_to_value(XML_LIST).unwrap()).unwrap();
        assert_eq!(page.items[0].student_code.as_deref(), Some("SV001"));
        assert_eq!(page.items[1].student_code, None);

        let record = decode_record(json!({"id": 4, "student_code": "B20DCCN001", "first_name": "Ha"})).unwrap();
        assert_eq!(record.student_code.as_deref(), Some("B20DCCN001"));
    }

    #[test]
    fn message_only_acknowledgements_carry_no_record() {
        let created = json!({"error": "", "message": "Create student successfully !"});
        assert_eq!(decode_optional_record(created).unwrap(), None);
        assert_eq!(decode_optional_record(json!({"message": "No student found", "data": null})).unwrap(), None);
        assert_eq!(decode_optional_record(Value::Null).unwrap(), None);

        let echoed = decode_optional_record(json!({"data": {"id": 5, "ten": "Lan"}})).unwrap();
        assert_eq!(echoed.map(|record| record.first_name), Some("Lan".to_string()));
    }

    #[test]
    fn request_bodies_use_the_backend_field_names() {
        let fields = StudentFields {
            student_code: Some("SV010".to_string()),
            first_name: "An".to_string(),
            last_name: "Nguyen Van".to_string(),
            email: "an.nv@example.com".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 1, 15).unwrap(),
            hometown: "Ha Noi".to_string(),
            math_score: 8.5,
            literature_score: 7.0,
            english_score: 9.0,
        };

        let vietnamese = encode_fields(&fields, RequestFields::Vietnamese);
        assert_eq!(vietnamese["ma_so_sv"], "SV010");
        assert_eq!(vietnamese["ho"], "Nguyen Van");
        assert_eq!(vietnamese["ten"], "An");
        assert_eq!(vietnamese["ngay_sinh"], "2000-01-15");
        assert_eq!(vietnamese["diem_van"], 7.0);

        let english = encode_fields(&fields, RequestFields::English);
        assert_eq!(english["student_code"], "SV010");
        assert_eq!(english["birth_date"], "2000-01-15");
        assert_eq!(english["literature_score"], 7.0);
        assert!(english.get("ma_so_sv").is_none());

        let uncoded = StudentFields {
            student_code: None,
            ..fields
        };
        assert!(encode_fields(&uncoded, RequestFields::Vietnamese).get("ma_so_sv").is_none());
        assert_eq!("en".parse::<RequestFields>(), Ok(RequestFields::English));
        assert!("fr".parse::<RequestFields>().is_err());
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        assert!(matches!(parse_body(BodyFormat::Json, "{not json"), Err(StoreError::Parse(_))));
        assert!(matches!(parse_body(BodyFormat::Xml, "<response><item>"), Err(StoreError::Parse(_))));
        assert!(matches!(decode_record(json!({"firstName": "no id"})), Err(StoreError::Parse(_))));
        assert!(matches!(decode_record(json!({"id": 1, "mathScore": 12})), Err(StoreError::Parse(_))));
        assert!(matches!(decode_page(json!("nope")), Err(StoreError::Parse(_))));
        assert_eq!(parse_body(BodyFormat::Json, "  ").unwrap(), Value::Null);
    }

    #[test]
    fn statistics_accept_either_naming() {
        let stats = decode_statistics(json!({
            "total_students": 3, "avg_diem_toan": 8.33, "avg_diem_van": null,
            "avg_diem_anh": "8.17", "avg_diem_trung_binh": 8.2
        }))
        .unwrap();
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.avg_math_score, Some(8.33));
        assert_eq!(stats.avg_literature_score, None);
        assert_eq!(stats.avg_english_score, Some(8.17));

        let xml = "<response><total_students>0</total_students><avg_diem_toan></avg_diem_toan></response>";
        let stats = decode_statistics(xml_to_value(xml).unwrap()).unwrap();
        assert_eq!(stats.total_students, 0);
        assert_eq!(stats.avg_math_score, None);
    }
}
