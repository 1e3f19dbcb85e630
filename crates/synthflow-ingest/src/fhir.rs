//! Minimal FHIR bundle inspection

use serde_json::Value;

/// Number of `entry` elements of a FHIR Bundle; any other document counts as one record
pub fn record_count(document: &Value) -> i32 {
    match bundle_entries(document) {
        Some(entries) => i32::try_from(entries.len()).unwrap_or(i32::MAX),
        None => 1,
    }
}

fn bundle_entries(document: &Value) -> Option<&Vec<Value>> {
    if document.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return None;
    }
    document.get("entry").and_then(Value::as_array)
}

/// Headline facts about the patient in a generated bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientSummary {
    pub patient_id: String,
    /// Given names and family name of the first recorded name
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub resource_count: usize,
    pub size_bytes: u64,
}

/// Summary of the first Patient resource in `bundle`, if there is one
pub fn patient_summary(bundle: &Value, size_bytes: u64) -> Option<PatientSummary> {
    let entries = bundle_entries(bundle)?;

    let patient = entries
        .iter()
        .filter_map(|entry| entry.get("resource"))
        .find(|resource| resource.get("resourceType").and_then(Value::as_str) == Some("Patient"))?;

    let text = |field: &str| patient.get(field).and_then(Value::as_str).map(str::to_string);

    Some(PatientSummary {
        patient_id: text("id")?,
        name: patient
            .get("name")
            .and_then(Value::as_array)
            .and_then(|names| names.first())
            .and_then(display_name),
        gender: text("gender"),
        birth_date: text("birthDate"),
        resource_count: entries.len(),
        size_bytes,
    })
}

fn display_name(name: &Value) -> Option<String> {
    let mut parts: Vec<&str> = name
        .get("given")
        .and_then(Value::as_array)
        .map(|given| given.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(family) = name.get("family").and_then(Value::as_str) {
        parts.push(family);
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "a1b2", "gender": "female", "birthDate": "1984-03-02",
                    "name": [{"given": ["Ana", "María"], "family": "Diaz"}]}},
                {"resource": {"resourceType": "Encounter", "id": "enc-1"}},
                {"resource": {"resourceType": "Observation", "id": "obs-1"}}
            ]
        })
    }

    #[test]
    fn test_record_count() {
        assert_eq!(record_count(&bundle()), 3);
        assert_eq!(record_count(&json!({"resourceType": "Bundle"})), 1);
        assert_eq!(record_count(&json!({"resourceType": "Organization"})), 1);
        assert_eq!(record_count(&json!([1, 2, 3])), 1);
    }

    #[test]
    fn test_patient_summary() {
        let summary = patient_summary(&bundle(), 2048).unwrap();
        assert_eq!(summary.patient_id, "a1b2");
        assert_eq!(summary.name.as_deref(), Some("Ana María Diaz"));
        assert_eq!(summary.gender.as_deref(), Some("female"));
        assert_eq!(summary.birth_date.as_deref(), Some("1984-03-02"));
        assert_eq!(summary.resource_count, 3);
        assert_eq!(summary.size_bytes, 2048);
    }

    #[test]
    fn test_summary_requires_patient() {
        let bundle = json!({"resourceType": "Bundle", "entry": [{"resource": {"resourceType": "Location"}}]});
        assert!(patient_summary(&bundle, 10).is_none());
    }
}
